// Configuration management with layered configuration (file, env)

use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub minio: MinioConfig,
    pub remote: RemoteConfig,
    pub provider: ProviderConfig,
    pub stage_job: StageJobConfig,
    pub import_job: ImportJobConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

fn default_list_page_size() -> usize {
    1000
}

/// SSH host serving the provider's export directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    pub auth: RemoteAuth,
    pub root_dir: String,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    #[serde(default)]
    pub verify_host_key: bool,
}

fn default_command_timeout() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteAuth {
    Password {
        username: String,
        password: String,
    },
    SshKey {
        username: String,
        private_key_path: String,
    },
}

impl RemoteAuth {
    pub fn username(&self) -> &str {
        match self {
            RemoteAuth::Password { username, .. } | RemoteAuth::SshKey { username, .. } => {
                username
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub staging_dir: PathBuf,
    /// IANA timezone the provider's calendar days are expressed in
    #[serde(default = "default_timezone")]
    pub timezone: String,
    pub categories: Vec<ReportCategory>,
}

fn default_timezone() -> String {
    "Asia/Shanghai".to_string()
}

/// One logical report category exported under its own sub-path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportCategory {
    pub name: String,
    pub sub_path: String,
    pub layout: SectionLayout,
    /// Extensions eligible for import, lowercase and without the dot
    pub extensions: Vec<String>,
}

impl ReportCategory {
    /// Whether a key's extension is importable for this category
    pub fn accepts_extension(&self, key: &str) -> bool {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        match file_name.rsplit_once('.') {
            Some((_, ext)) => self
                .extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }
}

/// Shape of the CSV files found under a category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SectionLayout {
    /// Summary section followed by a detail section
    Sectioned,
    /// One header line followed by transaction rows
    Transactions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageJobConfig {
    pub max_workers: usize,
    pub page_size: usize,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub target_date: Option<NaiveDate>,
}

fn default_lookback_days() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobConfig {
    pub max_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub tracing_endpoint: Option<String>,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Local overrides, not committed
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.minio.endpoint.is_empty() {
            return Err("MinIO endpoint cannot be empty".to_string());
        }
        if self.minio.bucket.is_empty() {
            return Err("MinIO bucket cannot be empty".to_string());
        }
        if self.minio.list_page_size == 0 {
            return Err("MinIO list_page_size must be greater than 0".to_string());
        }

        if self.remote.host.is_empty() {
            return Err("Remote host cannot be empty".to_string());
        }
        if self.remote.auth.username().is_empty() {
            return Err("Remote username cannot be empty".to_string());
        }

        if self.provider.provider_id.is_empty() {
            return Err("Provider id cannot be empty".to_string());
        }
        if self.provider.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(format!(
                "Unknown provider timezone: {}",
                self.provider.timezone
            ));
        }
        if self.provider.categories.is_empty() {
            return Err("At least one report category must be configured".to_string());
        }
        for category in &self.provider.categories {
            if category.sub_path.trim_matches('/').is_empty() {
                return Err(format!(
                    "Report category '{}' has an empty sub_path",
                    category.name
                ));
            }
            if category.extensions.is_empty() {
                return Err(format!(
                    "Report category '{}' has no importable extensions",
                    category.name
                ));
            }
        }

        if self.stage_job.max_workers == 0 {
            return Err("Stage job max_workers must be greater than 0".to_string());
        }
        if self.stage_job.page_size == 0 {
            return Err("Stage job page_size must be greater than 0".to_string());
        }
        if self.import_job.max_workers == 0 {
            return Err("Import job max_workers must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/reconciliation".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            minio: MinioConfig {
                endpoint: "http://localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "reconciliation".to_string(),
                region: "us-east-1".to_string(),
                list_page_size: default_list_page_size(),
            },
            remote: RemoteConfig {
                host: "localhost".to_string(),
                port: 22,
                auth: RemoteAuth::Password {
                    username: "reconcile".to_string(),
                    password: "change-me".to_string(),
                },
                root_dir: "/data/provider".to_string(),
                command_timeout_seconds: default_command_timeout(),
                verify_host_key: false,
            },
            provider: ProviderConfig {
                provider_id: "default-provider".to_string(),
                staging_dir: PathBuf::from("./data/staging"),
                timezone: default_timezone(),
                categories: vec![
                    ReportCategory {
                        name: "daily_bill".to_string(),
                        sub_path: "bill/daily".to_string(),
                        layout: SectionLayout::Sectioned,
                        extensions: vec!["zip".to_string()],
                    },
                    ReportCategory {
                        name: "transactions".to_string(),
                        sub_path: "trade/detail".to_string(),
                        layout: SectionLayout::Transactions,
                        extensions: vec!["csv".to_string()],
                    },
                ],
            },
            stage_job: StageJobConfig {
                max_workers: 8,
                page_size: 200,
                lookback_days: default_lookback_days(),
                target_date: None,
            },
            import_job: ImportJobConfig { max_workers: 4 },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
                metrics_port: None,
                tracing_endpoint: None,
            },
        }
    }
}
