// Background producer of remote file groups

use super::{join_remote, RemoteFileSource};
use crate::config::ReportCategory;
use crate::models::RemoteFileGroup;
use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pages buffered between the lister and its consumer
const CHANNEL_CAPACITY: usize = 2;

/// Lists every configured category folder and streams the paths in pages
pub struct RemoteLister {
    source: Arc<dyn RemoteFileSource>,
    root_dir: String,
    categories: Vec<ReportCategory>,
    page_size: usize,
}

impl RemoteLister {
    pub fn new(
        source: Arc<dyn RemoteFileSource>,
        root_dir: impl Into<String>,
        categories: Vec<ReportCategory>,
        page_size: usize,
    ) -> Self {
        Self {
            source,
            root_dir: root_dir.into(),
            categories,
            page_size: page_size.max(1),
        }
    }

    /// Start listing in the background
    ///
    /// The channel is bounded, so the producer waits when the consumer lags.
    /// It closes once every folder is listed, the receiver is dropped, or
    /// `cancel` fires. A folder that fails to list is logged and skipped.
    pub fn spawn(
        self,
        target_date: NaiveDate,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<RemoteFileGroup>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move { self.produce(target_date, tx, cancel).await });
        (rx, handle)
    }

    async fn produce(
        self,
        target_date: NaiveDate,
        tx: mpsc::Sender<RemoteFileGroup>,
        cancel: CancellationToken,
    ) {
        for category in &self.categories {
            let folder = join_remote(&self.root_dir, &category.sub_path);

            let listed = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Remote listing cancelled");
                    return;
                }
                listed = self.source.list_folder(&folder, target_date) => listed,
            };

            let mut paths = match listed {
                Ok(paths) => paths,
                Err(e) => {
                    warn!(
                        category = %category.name,
                        folder = %folder,
                        error = %e,
                        "Failed to list remote folder, skipping"
                    );
                    continue;
                }
            };
            paths.sort();

            debug!(category = %category.name, folder = %folder, count = paths.len(), "Folder listed");

            for page in paths.chunks(self.page_size) {
                let group = RemoteFileGroup {
                    category: category.name.clone(),
                    folder: folder.clone(),
                    paths: page.to_vec(),
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Remote listing cancelled");
                        return;
                    }
                    sent = tx.send(group) => {
                        if sent.is_err() {
                            debug!("Listing consumer dropped, stopping");
                            return;
                        }
                    }
                }
            }
        }
    }
}
