// Object storage for staged provider files

pub mod minio;

pub use minio::MinioObjectStore;

use crate::errors::StorageError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

/// Tag carrying the import outcome on a staged object
pub const IMPORT_STATUS_TAG: &str = "import_status";

/// Object store holding staged files, keyed by path relative to the remote root
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Put `body` at `key`, overwriting any existing object
    ///
    /// Fails with `StorageError::ContentLength` when `body` does not match
    /// `content_length`.
    async fn upload(&self, key: &str, body: &[u8], content_length: u64)
        -> Result<(), StorageError>;

    /// Every key under `prefix`, fetched page by page as the stream is polled
    fn list_keys(&self, prefix: &str) -> BoxStream<'static, Result<String, StorageError>>;

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Stream an object into `writer` without buffering it whole
    async fn download_to(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError>;

    async fn get_tag(&self, key: &str, name: &str) -> Result<Option<String>, StorageError>;

    /// Set one tag, keeping the object's other tags
    async fn set_tag(&self, key: &str, name: &str, value: &str) -> Result<(), StorageError>;
}

/// Derive the storage key for a remote path
///
/// A single leading slash is dropped from both arguments, then the prefix
/// (when present) and any slash left in front of the remainder.
pub fn key_from_remote_path(remote_path: &str, prefix: &str) -> String {
    let path = remote_path.strip_prefix('/').unwrap_or(remote_path);
    let prefix = prefix.strip_prefix('/').unwrap_or(prefix);

    let relative = if prefix.is_empty() {
        path
    } else {
        path.strip_prefix(prefix).unwrap_or(path)
    };

    relative.strip_prefix('/').unwrap_or(relative).to_string()
}
