use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// File tracking
// ============================================================================

/// Progress of one pipeline stage for one file
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Success => write!(f, "success"),
            FileStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "success" => Ok(FileStatus::Success),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(format!("Invalid file status: {}", s)),
        }
    }
}

impl TryFrom<String> for FileStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The three independently tracked stages of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Download,
    Upload,
    Import,
}

impl Stage {
    /// Status column backing this stage
    pub fn column(&self) -> &'static str {
        match self {
            Stage::Download => "download_status",
            Stage::Upload => "upload_status",
            Stage::Import => "import_status",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Download => write!(f, "download"),
            Stage::Upload => write!(f, "upload"),
            Stage::Import => write!(f, "import"),
        }
    }
}

/// One row per discovered source file; `file_name` is the natural key
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct FileRecord {
    pub id: Uuid,
    pub provider_id: String,
    pub group_id: Option<Uuid>,
    pub file_name: String,
    pub folder: String,
    pub remote_path: String,
    pub storage_key: String,
    #[sqlx(try_from = "String")]
    pub download_status: FileStatus,
    #[sqlx(try_from = "String")]
    pub upload_status: FileStatus,
    #[sqlx(try_from = "String")]
    pub import_status: FileStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Create a freshly discovered record with every stage pending
    pub fn new_pending(
        provider_id: impl Into<String>,
        group_id: Option<Uuid>,
        folder: impl Into<String>,
        remote_path: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        let remote_path = remote_path.into();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider_id: provider_id.into(),
            group_id,
            file_name: file_name_of(&remote_path).to_string(),
            folder: folder.into(),
            remote_path,
            storage_key: storage_key.into(),
            download_status: FileStatus::Pending,
            upload_status: FileStatus::Pending,
            import_status: FileStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Files discovered by one stager run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct FileGroup {
    pub id: Uuid,
    pub name: String,
    pub provider_id: String,
    pub target_date: NaiveDate,
    pub imported_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FileGroup {
    /// Name format: `<provider_id>-<YYYYMMDD>-<8 hex chars>`
    pub fn new(provider_id: impl Into<String>, target_date: NaiveDate) -> Self {
        let provider_id = provider_id.into();
        let id = Uuid::new_v4();
        let suffix: String = id.simple().to_string().chars().take(8).collect();
        Self {
            id,
            name: format!(
                "{}-{}-{}",
                provider_id,
                target_date.format("%Y%m%d"),
                suffix
            ),
            provider_id,
            target_date,
            imported_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Last path segment of a remote path or object key
pub fn file_name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ============================================================================
// Discovery
// ============================================================================

/// One page of paths discovered under a category folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileGroup {
    pub category: String,
    pub folder: String,
    pub paths: Vec<String>,
}

/// A single remote file queued for staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub category: String,
    pub remote_path: String,
}

/// Counters reported at the end of a job run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub skipped: usize,
}

impl RunReport {
    pub fn failed(&self) -> usize {
        self.dispatched.saturating_sub(self.succeeded)
    }
}

// ============================================================================
// Section records
// ============================================================================

/// Logical type of a parsed section
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Summary,
    Detail,
    Transaction,
}

impl FileKind {
    /// Table holding this section's rows
    pub fn table(&self) -> &'static str {
        match self {
            FileKind::Summary => "reconciliation_summaries",
            FileKind::Detail => "reconciliation_details",
            FileKind::Transaction => "reconciliation_transactions",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Summary => write!(f, "summary"),
            FileKind::Detail => write!(f, "detail"),
            FileKind::Transaction => write!(f, "transaction"),
        }
    }
}

/// Provider transaction status after mapping from the source-language label
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Success,
    Failed,
    Processing,
    Refunded,
    Closed,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionStatus::Success => write!(f, "success"),
            TransactionStatus::Failed => write!(f, "failed"),
            TransactionStatus::Processing => write!(f, "processing"),
            TransactionStatus::Refunded => write!(f, "refunded"),
            TransactionStatus::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryRecord {
    pub file_id: Uuid,
    pub merchant_id: Option<String>,
    pub merchant_name: Option<String>,
    pub settle_date: Option<NaiveDate>,
    pub total_count: i64,
    pub total_amount: f64,
    pub refund_count: i64,
    pub refund_amount: f64,
    pub fee_amount: f64,
    pub net_amount: f64,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRecord {
    pub file_id: Uuid,
    pub transaction_id: Option<String>,
    pub merchant_order_no: Option<String>,
    pub transaction_time: Option<NaiveDateTime>,
    pub transaction_type: Option<String>,
    pub transaction_amount: f64,
    pub fee_amount: f64,
    pub tax: f64,
    pub net_amount: f64,
    pub status: Option<TransactionStatus>,
    pub currency: Option<String>,
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub file_id: Uuid,
    pub transaction_id: Option<String>,
    pub merchant_id: Option<String>,
    pub merchant_order_no: Option<String>,
    pub transaction_time: Option<NaiveDateTime>,
    pub transaction_amount: f64,
    pub status: Option<TransactionStatus>,
    pub channel: Option<String>,
    pub payer_account: Option<String>,
    pub currency: Option<String>,
}

/// All typed rows of one section of one file, inserted together
#[derive(Debug, Clone, PartialEq)]
pub enum SectionBatch {
    Summary(Vec<SummaryRecord>),
    Detail(Vec<DetailRecord>),
    Transaction(Vec<TransactionRecord>),
}

impl SectionBatch {
    pub fn kind(&self) -> FileKind {
        match self {
            SectionBatch::Summary(_) => FileKind::Summary,
            SectionBatch::Detail(_) => FileKind::Detail,
            SectionBatch::Transaction(_) => FileKind::Transaction,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SectionBatch::Summary(rows) => rows.len(),
            SectionBatch::Detail(rows) => rows.len(),
            SectionBatch::Transaction(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
