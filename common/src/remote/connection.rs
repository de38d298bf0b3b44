// SSH session management for remote command execution

use crate::config::{RemoteAuth, RemoteConfig};
use crate::errors::RemoteError;
use ssh2::Session;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Largest stderr kept for diagnostics
const STDERR_LIMIT: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stderr: String,
    pub bytes_written: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Authenticated SSH session, opened for a single operation
pub struct SshSession {
    session: Session,
    idle_timeout: Duration,
    _tcp: TcpStream,
}

impl SshSession {
    /// Open and authenticate a session
    ///
    /// Read and write timeouts on the socket come from
    /// `command_timeout_seconds`, so a hung remote command eventually
    /// releases its worker.
    #[instrument(skip(config), fields(host = %config.host, port = config.port))]
    pub fn connect(config: &RemoteConfig) -> Result<Self, RemoteError> {
        debug!("Establishing SSH connection");

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            error!(error = %e, host = %config.host, port = config.port, "Failed to connect");
            RemoteError::Connection(format!(
                "Failed to connect to {}:{}: {}",
                config.host, config.port, e
            ))
        })?;

        let idle_timeout = Duration::from_secs(config.command_timeout_seconds);
        let timeout = Some(idle_timeout);
        tcp.set_read_timeout(timeout).map_err(|e| {
            RemoteError::Connection(format!("Failed to set read timeout: {}", e))
        })?;
        tcp.set_write_timeout(timeout).map_err(|e| {
            RemoteError::Connection(format!("Failed to set write timeout: {}", e))
        })?;

        let mut session = Session::new().map_err(|e| {
            error!(error = %e, "Failed to create SSH session");
            RemoteError::Connection(format!("Failed to create SSH session: {}", e))
        })?;
        session.set_timeout(
            u32::try_from(config.command_timeout_seconds.saturating_mul(1000)).unwrap_or(u32::MAX),
        );

        session.set_tcp_stream(tcp.try_clone().map_err(|e| {
            RemoteError::Connection(format!("Failed to clone TCP stream: {}", e))
        })?);

        session.handshake().map_err(|e| {
            error!(error = %e, "SSH handshake failed");
            RemoteError::Connection(format!("SSH handshake failed: {}", e))
        })?;

        if config.verify_host_key {
            log_host_key(&session);
        }

        authenticate(&session, &config.auth)?;

        if !session.authenticated() {
            error!("Authentication failed - session not authenticated");
            return Err(RemoteError::Authentication(
                "Session not authenticated".to_string(),
            ));
        }

        debug!("SSH connection established");
        Ok(Self {
            session,
            idle_timeout,
            _tcp: tcp,
        })
    }

    /// Run `command` and copy its stdout into `out`
    ///
    /// Stdout and stderr are read alternately on a non-blocking channel,
    /// with the socket timeout applied as an idle timeout.
    /// A non-zero exit is not an error here; callers decide what it means.
    #[instrument(skip(self, out))]
    pub fn exec<W: Write>(&self, command: &str, out: &mut W) -> Result<CommandOutput, RemoteError> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        self.session.set_blocking(false);
        let pumped = {
            let mut stdout = channel.stream(0);
            let mut stderr = channel.stderr();
            pump(&mut stdout, &mut stderr, out, self.idle_timeout)
        };
        self.session.set_blocking(true);

        let (bytes_written, stderr) = pumped.map_err(|e| {
            error!(error = %e, "Failed to read command output");
            if e.kind() == io::ErrorKind::TimedOut {
                RemoteError::Timeout {
                    command: command.to_string(),
                    seconds: self.idle_timeout.as_secs(),
                }
            } else {
                RemoteError::LocalIo {
                    path: command.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        channel.wait_close()?;
        let exit_code = channel.exit_status()?;

        debug!(exit_code = exit_code, bytes = bytes_written, "Remote command finished");
        Ok(CommandOutput {
            exit_code,
            stderr: stderr.trim().to_string(),
            bytes_written,
        })
    }
}

/// Copy `stdout` into `out` while draining `stderr`, until both reach EOF
///
/// Readers are non-blocking: `WouldBlock` means no data yet. Fails with
/// `TimedOut` when neither stream makes progress for `idle_timeout`.
fn pump<O: Read, E: Read, W: Write>(
    stdout: &mut O,
    stderr: &mut E,
    out: &mut W,
    idle_timeout: Duration,
) -> io::Result<(u64, String)> {
    let mut buf = [0u8; 32 * 1024];
    let mut stderr_bytes = Vec::new();
    let mut bytes_written = 0u64;
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut last_progress = Instant::now();

    while stdout_open || stderr_open {
        let mut progressed = false;

        if stdout_open {
            match stdout.read(&mut buf) {
                Ok(0) => stdout_open = false,
                Ok(n) => {
                    out.write_all(&buf[..n])?;
                    bytes_written += n as u64;
                    progressed = true;
                }
                Err(e) if is_retryable(&e) => {}
                Err(e) => return Err(e),
            }
        }

        if stderr_open {
            match stderr.read(&mut buf) {
                Ok(0) => stderr_open = false,
                Ok(n) => {
                    let room = STDERR_LIMIT.saturating_sub(stderr_bytes.len());
                    stderr_bytes.extend_from_slice(&buf[..n.min(room)]);
                    progressed = true;
                }
                Err(e) if is_retryable(&e) => {}
                Err(e) => return Err(e),
            }
        }

        if progressed {
            last_progress = Instant::now();
        } else if stdout_open || stderr_open {
            if last_progress.elapsed() >= idle_timeout {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "remote command stopped producing output",
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    Ok((
        bytes_written,
        String::from_utf8_lossy(&stderr_bytes).into_owned(),
    ))
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Log the server's host key fingerprint
fn log_host_key(session: &Session) {
    if let Some((_key, key_type)) = session.host_key() {
        if let Some(hash) = session.host_key_hash(ssh2::HashType::Sha256) {
            let fingerprint = hash
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(":");
            info!(host_key_type = ?key_type, fingerprint = %fingerprint, "Remote host key");
        }
    }
}

fn authenticate(session: &Session, auth: &RemoteAuth) -> Result<(), RemoteError> {
    match auth {
        RemoteAuth::Password { username, password } => {
            debug!(username = %username, "Authenticating with password");
            session.userauth_password(username, password).map_err(|e| {
                error!(error = %e, username = %username, "Password authentication failed");
                RemoteError::Authentication(format!(
                    "Password authentication failed for user {}: {}",
                    username, e
                ))
            })?;
        }
        RemoteAuth::SshKey {
            username,
            private_key_path,
        } => {
            debug!(username = %username, key_path = %private_key_path, "Authenticating with SSH key");
            session
                .userauth_pubkey_file(username, None, Path::new(private_key_path), None)
                .map_err(|e| {
                    error!(
                        error = %e,
                        username = %username,
                        key_path = %private_key_path,
                        "SSH key authentication failed"
                    );
                    RemoteError::Authentication(format!(
                        "SSH key authentication failed for user {}: {}",
                        username, e
                    ))
                })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Reader replaying a fixed sequence of chunks and `WouldBlock`s, then EOF
    struct Scripted(VecDeque<Option<Vec<u8>>>);

    impl Scripted {
        fn new(steps: Vec<Option<Vec<u8>>>) -> Self {
            Self(steps.into())
        }
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::ErrorKind::WouldBlock.into()),
                None => Ok(0),
            }
        }
    }

    /// Reader that never has data
    struct Idle;

    impl Read for Idle {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    #[test]
    fn test_pump_drains_stderr_while_stdout_waits() {
        // Stdout stays empty until stderr has been drained
        let mut stdout = Scripted::new(vec![None, None, None, Some(b"h1,h2\n".to_vec())]);
        let mut stderr = Scripted::new(vec![
            Some(vec![b'w'; 1024]),
            Some(vec![b'w'; 1024]),
            Some(b"done".to_vec()),
        ]);
        let mut out = Vec::new();

        let (bytes, stderr_text) =
            pump(&mut stdout, &mut stderr, &mut out, Duration::from_secs(5)).unwrap();

        assert_eq!(out, b"h1,h2\n".to_vec());
        assert_eq!(bytes, 6);
        assert_eq!(stderr_text.len(), 2048 + 4);
        assert!(stderr_text.ends_with("done"));
    }

    #[test]
    fn test_pump_caps_stored_stderr() {
        let chunks = (0..(STDERR_LIMIT / 1024 + 4))
            .map(|_| Some(vec![b'e'; 1024]))
            .collect();
        let mut stdout = Scripted::new(vec![]);
        let mut stderr = Scripted::new(chunks);
        let mut out = Vec::new();

        let (_, stderr_text) =
            pump(&mut stdout, &mut stderr, &mut out, Duration::from_secs(5)).unwrap();

        assert_eq!(stderr_text.len(), STDERR_LIMIT);
    }

    #[test]
    fn test_pump_times_out_without_progress() {
        let mut out = Vec::new();
        let result = pump(&mut Idle, &mut Idle, &mut out, Duration::from_millis(30));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_command_output_success() {
        let ok = CommandOutput {
            exit_code: 0,
            stderr: String::new(),
            bytes_written: 10,
        };
        let failed = CommandOutput {
            exit_code: 2,
            stderr: "No such file or directory".to_string(),
            bytes_written: 0,
        };
        assert!(ok.success());
        assert!(!failed.success());
    }

    #[test]
    fn test_connect_to_closed_port_fails_with_connection_error() {
        let config = RemoteConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            auth: RemoteAuth::Password {
                username: "nobody".to_string(),
                password: "nothing".to_string(),
            },
            root_dir: "/".to_string(),
            command_timeout_seconds: 1,
            verify_host_key: false,
        };
        let result = SshSession::connect(&config);
        assert!(matches!(result, Err(RemoteError::Connection(_))));
    }
}
