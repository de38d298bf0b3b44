// Batch jobs: remote-to-storage staging and storage-to-database import

pub mod import;
pub mod stage;

pub use import::ImportJob;
pub use stage::StageJob;

use crate::errors::PipelineError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Await `fut` unless `cancel` fires first
pub(crate) async fn with_cancel<T, E, F>(cancel: &CancellationToken, fut: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<PipelineError>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(PipelineError::Cancelled),
        result = fut => result.map_err(Into::into),
    }
}
