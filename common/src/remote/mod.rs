// Remote file source: discovery and retrieval of provider exports over SSH

mod connection;
mod lister;
mod source;

pub use connection::{CommandOutput, SshSession};
pub use lister::RemoteLister;
pub use source::SshRemoteSource;

use crate::errors::RemoteError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;

/// Extensions the remote search returns
pub const LISTED_EXTENSIONS: [&str; 3] = ["csv", "pdf", "zip"];

/// Remote file operations
///
/// Every call is self-contained (no session is kept between calls), so
/// callers may retry any operation independently.
#[async_trait]
pub trait RemoteFileSource: Send + Sync {
    /// Paths under `folder_path` modified on or after `since`, sorted
    async fn list_folder(
        &self,
        folder_path: &str,
        since: NaiveDate,
    ) -> Result<Vec<String>, RemoteError>;

    async fn read_all(&self, remote_path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Copy a remote file to `local_path`, returning the bytes written
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteError>;

    async fn file_size(&self, remote_path: &str) -> Result<u64, RemoteError>;
}

/// Quote an argument for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Join the remote root with a category sub-path
pub fn join_remote(root: &str, sub_path: &str) -> String {
    let root = root.trim_end_matches('/');
    let sub_path = sub_path.trim_matches('/');
    if sub_path.is_empty() {
        return root.to_string();
    }
    format!("{}/{}", root, sub_path)
}

/// Search command for files in `folder` modified on or after `since`
pub fn find_command(folder: &str, since: NaiveDate) -> String {
    let patterns = LISTED_EXTENSIONS
        .iter()
        .map(|ext| format!("-iname {}", shell_quote(&format!("*.{}", ext))))
        .collect::<Vec<_>>()
        .join(" -o ");

    format!(
        "find {} -type f -newermt {} \\( {} \\) | sort",
        shell_quote(folder),
        shell_quote(&since.format("%Y-%m-%d").to_string()),
        patterns
    )
}

pub fn cat_command(remote_path: &str) -> String {
    format!("cat -- {}", shell_quote(remote_path))
}

pub fn stat_command(remote_path: &str) -> String {
    format!("stat -c %s -- {}", shell_quote(remote_path))
}
