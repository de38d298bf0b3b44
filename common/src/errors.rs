// Error handling framework for the reconciliation import pipeline

use thiserror::Error;

/// Errors raised by the remote (SSH) file source
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("SSH connection failed: {0}")]
    Connection(String),

    #[error("SSH authentication failed: {0}")]
    Authentication(String),

    #[error("Transfer of '{path}' failed with exit code {exit_code}: {stderr}")]
    Transfer {
        path: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to stat '{path}': {reason}")]
    RemoteStat { path: String, reason: String },

    #[error("Failed to list folder '{folder}': {reason}")]
    Listing { folder: String, reason: String },

    #[error("Local I/O failed for '{path}': {reason}")]
    LocalIo { path: String, reason: String },

    #[error("Remote command produced no output for {seconds}s: {command}")]
    Timeout { command: String, seconds: u64 },
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database health check failed: {0}")]
    HealthCheckFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate key violation: {0}")]
    DuplicateKey(String),

    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),
}

/// Object storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("MinIO error: {0}")]
    MinioError(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Content length mismatch for '{key}': declared {declared}, actual {actual}")]
    ContentLength {
        key: String,
        declared: u64,
        actual: u64,
    },

    #[error("Filesystem error: {0}")]
    FileSystemError(String),
}

/// Errors raised while turning file content into sections
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Content of '{0}' is not valid UTF-8")]
    Encoding(String),

    #[error("Failed to read ZIP archive '{name}': {reason}")]
    Zip { name: String, reason: String },

    #[error("ZIP archive '{0}' contains no CSV member")]
    MissingCsvMember(String),

    #[error("Failed to split CSV line {line}: {reason}")]
    Csv { line: usize, reason: String },
}

/// A field value that cannot be coerced under a hard-fail policy
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Field '{field}' has invalid value '{value}': {reason}")]
pub struct CoercionError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// Errors surfaced by the stage and import jobs
///
/// Per-file failures are logged by the worker pool; `Listing`, `GroupCreation`
/// and `Cancelled` may also terminate a whole run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Coercion(#[from] CoercionError),

    #[error("Import of '{file_name}' failed: {reason}")]
    ImportFailed { file_name: String, reason: String },

    #[error("Object listing failed: {0}")]
    Listing(String),

    #[error("Failed to create file group: {0}")]
    GroupCreation(String),

    #[error("Run cancelled")]
    Cancelled,
}

// Implement From for common external errors
impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // Check for specific database error codes
                if let Some(code) = db_err.code() {
                    match code.as_ref() {
                        "23505" => DatabaseError::DuplicateKey(db_err.message().to_string()),
                        "23503" => DatabaseError::ForeignKeyViolation(db_err.message().to_string()),
                        _ => DatabaseError::QueryFailed(db_err.message().to_string()),
                    }
                } else {
                    DatabaseError::QueryFailed(db_err.message().to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<s3::error::S3Error> for StorageError {
    fn from(err: s3::error::S3Error) -> Self {
        StorageError::MinioError(err.to_string())
    }
}

impl From<ssh2::Error> for RemoteError {
    fn from(err: ssh2::Error) -> Self {
        RemoteError::Connection(err.to_string())
    }
}
