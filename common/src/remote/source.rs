// SSH-backed remote file source

use super::connection::{CommandOutput, SshSession};
use super::{cat_command, find_command, stat_command, RemoteFileSource};
use crate::config::RemoteConfig;
use crate::errors::RemoteError;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Runs each operation on a fresh SSH session inside `spawn_blocking`
#[derive(Clone)]
pub struct SshRemoteSource {
    config: Arc<RemoteConfig>,
}

impl SshRemoteSource {
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, RemoteError>
    where
        T: Send + 'static,
        F: FnOnce(SshSession) -> Result<T, RemoteError> + Send + 'static,
    {
        let config = Arc::clone(&self.config);
        tokio::task::spawn_blocking(move || {
            let session = SshSession::connect(&config)?;
            op(session)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Remote task panicked or was aborted");
            RemoteError::Connection(format!("Remote task failed: {}", e))
        })?
    }
}

/// Non-empty trimmed lines of a listing
fn parse_listing(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Run `exec` into a freshly created `local` file
///
/// Parent directories are created. On a non-zero exit the partial file is
/// removed and the exit code and stderr are returned as a transfer error.
fn write_local<F>(remote_path: &str, local: &Path, exec: F) -> Result<u64, RemoteError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<CommandOutput, RemoteError>,
{
    let local_io = |e: std::io::Error| RemoteError::LocalIo {
        path: local.display().to_string(),
        reason: e.to_string(),
    };

    if let Some(parent) = local.parent() {
        std::fs::create_dir_all(parent).map_err(local_io)?;
    }

    let file = File::create(local).map_err(local_io)?;
    let mut writer = BufWriter::new(file);
    let output = exec(&mut writer)?;
    writer.flush().map_err(local_io)?;
    drop(writer);

    if !output.success() {
        if let Err(e) = std::fs::remove_file(local) {
            warn!(error = %e, local_path = %local.display(), "Failed to remove partial download");
        }
        return Err(RemoteError::Transfer {
            path: remote_path.to_string(),
            exit_code: output.exit_code,
            stderr: output.stderr,
        });
    }

    Ok(output.bytes_written)
}

#[async_trait]
impl RemoteFileSource for SshRemoteSource {
    #[instrument(skip(self))]
    async fn list_folder(
        &self,
        folder_path: &str,
        since: NaiveDate,
    ) -> Result<Vec<String>, RemoteError> {
        let folder = folder_path.to_string();
        let command = find_command(folder_path, since);

        self.with_session(move |session| {
            let mut stdout = Vec::new();
            let output = session.exec(&command, &mut stdout)?;

            // `sort` masks find's exit code; an empty result with stderr is a failure
            if !output.success() || (stdout.is_empty() && !output.stderr.is_empty()) {
                return Err(RemoteError::Listing {
                    folder,
                    reason: format!("exit code {}: {}", output.exit_code, output.stderr),
                });
            }

            let paths = parse_listing(&stdout);
            info!(folder = %folder, count = paths.len(), "Remote folder listed");
            Ok(paths)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn read_all(&self, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        let path = remote_path.to_string();

        self.with_session(move |session| {
            let mut content = Vec::new();
            let output = session.exec(&cat_command(&path), &mut content)?;
            if !output.success() {
                return Err(RemoteError::Transfer {
                    path,
                    exit_code: output.exit_code,
                    stderr: output.stderr,
                });
            }
            Ok(content)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, RemoteError> {
        let path = remote_path.to_string();
        let local: PathBuf = local_path.to_path_buf();

        self.with_session(move |session| {
            let command = cat_command(&path);
            let bytes = write_local(&path, &local, |writer| session.exec(&command, writer))?;
            info!(
                remote_path = %path,
                local_path = %local.display(),
                bytes = bytes,
                "Remote file downloaded"
            );
            Ok(bytes)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn file_size(&self, remote_path: &str) -> Result<u64, RemoteError> {
        let path = remote_path.to_string();

        self.with_session(move |session| {
            let mut stdout = Vec::new();
            let output = session.exec(&stat_command(&path), &mut stdout)?;
            if !output.success() {
                return Err(RemoteError::RemoteStat {
                    path,
                    reason: format!("exit code {}: {}", output.exit_code, output.stderr),
                });
            }

            let text = String::from_utf8_lossy(&stdout);
            text.trim().parse::<u64>().map_err(|e| RemoteError::RemoteStat {
                path: path.clone(),
                reason: format!("unexpected stat output '{}': {}", text.trim(), e),
            })
        })
        .await
    }
}
