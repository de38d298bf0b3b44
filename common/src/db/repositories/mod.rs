// Repository layer for file tracking and reconciliation rows

pub mod file_record;
pub mod queries;
pub mod reconciliation;

pub use file_record::{FileRecordRepository, FileRecordStore};
pub use reconciliation::{ReconciliationRepository, ReconciliationStore};
