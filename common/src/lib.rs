// Common library shared by the stager and importer binaries

pub mod config;
pub mod db;
pub mod errors;
pub mod jobs;
pub mod loader;
pub mod lock;
pub mod models;
pub mod parser;
pub mod remote;
pub mod storage;
pub mod telemetry;
pub mod worker;
