// Database layer: connection pool and repositories

pub mod pool;
pub mod repositories;

pub use pool::DbPool;
