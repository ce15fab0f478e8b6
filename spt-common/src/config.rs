//! Bootstrap configuration loading
//!
//! Configuration is resolved once at process start, in priority order:
//! 1. Command-line arguments (applied by each binary)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is not an error: the service logs a warning and
//! starts from defaults plus environment overrides.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SPT_CONFIG";

/// Config file name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "spt.toml";

/// Upper bound for `data.refresh_interval_hours` (ten years)
pub const MAX_REFRESH_INTERVAL_HOURS: u64 = 87_600;

/// Complete bootstrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Snapshot cache, archive and working-directory settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    /// Snapshot age (hours) after which a refresh is due
    #[serde(default = "default_refresh_interval_hours")]
    pub refresh_interval_hours: u64,
    /// Archived snapshots older than this many days are pruned
    #[serde(default = "default_archive_retention_days")]
    pub archive_retention_days: u64,
    #[serde(default = "default_current_data_path")]
    pub current_data_path: PathBuf,
    #[serde(default = "default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Raw bulk-read downloads are kept here for audit
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

/// Bulk export polling settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// CRM API credentials and endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrmConfig {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_api_domain")]
    pub api_domain: String,
    #[serde(default = "default_accounts_domain")]
    pub accounts_domain: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_refresh_interval_hours() -> u64 {
    24
}

fn default_archive_retention_days() -> u64 {
    30
}

fn default_current_data_path() -> PathBuf {
    PathBuf::from("data").join("current-data.json")
}

fn default_archive_dir() -> PathBuf {
    PathBuf::from("data").join("archive")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("data").join("bulk")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_api_domain() -> String {
    "https://www.zohoapis.com".to_string()
}

fn default_accounts_domain() -> String {
    "https://accounts.zoho.com".to_string()
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            refresh_interval_hours: default_refresh_interval_hours(),
            archive_retention_days: default_archive_retention_days(),
            current_data_path: default_current_data_path(),
            archive_dir: default_archive_dir(),
            work_dir: default_work_dir(),
        }
    }
}

impl DataConfig {
    /// Refresh period, capped at [`MAX_REFRESH_INTERVAL_HOURS`]
    pub fn refresh_interval(&self) -> Duration {
        let hours = self.refresh_interval_hours.min(MAX_REFRESH_INTERVAL_HOURS);
        Duration::from_secs(hours * 3600)
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            api_domain: default_api_domain(),
            accounts_domain: default_accounts_domain(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply environment overrides using the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are ignored. Numeric values that fail to parse are a
    /// configuration error.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ZOHO_CLIENT_ID") {
            self.crm.client_id = Some(v);
        }
        if let Some(v) = get("ZOHO_CLIENT_SECRET") {
            self.crm.client_secret = Some(v);
        }
        if let Some(v) = get("ZOHO_REFRESH_TOKEN") {
            self.crm.refresh_token = Some(v);
        }
        if let Some(v) = get("ZOHO_API_DOMAIN") {
            self.crm.api_domain = v;
        }
        if let Some(v) = get("ZOHO_ACCOUNTS_DOMAIN") {
            self.crm.accounts_domain = v;
        }
        if let Some(v) = get("DATA_REFRESH_INTERVAL") {
            self.data.refresh_interval_hours = parse_number("DATA_REFRESH_INTERVAL", &v)?;
        }
        if let Some(v) = get("ARCHIVE_RETENTION_DAYS") {
            self.data.archive_retention_days = parse_number("ARCHIVE_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = get("SPT_LOG_LEVEL") {
            self.logging.level = v;
        }

        Ok(())
    }

    /// Validate the configuration.
    ///
    /// `require_credentials` is set by binaries that talk to the CRM.
    pub fn validate(&self, require_credentials: bool) -> Result<()> {
        if require_credentials {
            let missing: Vec<&str> = [
                ("client_id", &self.crm.client_id),
                ("client_secret", &self.crm.client_secret),
                ("refresh_token", &self.crm.refresh_token),
            ]
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |v| v.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();

            if !missing.is_empty() {
                return Err(Error::Config(format!(
                    "Missing required CRM settings: {}",
                    missing.join(", ")
                )));
            }
        }

        if self.data.refresh_interval_hours == 0 {
            return Err(Error::Config(
                "data.refresh_interval_hours must be at least 1".to_string(),
            ));
        }
        if self.data.refresh_interval_hours > MAX_REFRESH_INTERVAL_HOURS {
            return Err(Error::Config(format!(
                "data.refresh_interval_hours must be at most {}",
                MAX_REFRESH_INTERVAL_HOURS
            )));
        }
        if self.data.archive_retention_days == 0 {
            return Err(Error::Config(
                "data.archive_retention_days must be at least 1".to_string(),
            ));
        }
        if self.bulk.poll_interval_secs == 0 || self.bulk.timeout_secs == 0 {
            return Err(Error::Config(
                "bulk.poll_interval_secs and bulk.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.crm.requests_per_second == 0 {
            return Err(Error::Config(
                "crm.requests_per_second must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Create the snapshot, archive and work directories if missing
    pub fn ensure_data_dirs(&self) -> Result<()> {
        if let Some(parent) = self.data.current_data_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(&self.data.archive_dir)?;
        std::fs::create_dir_all(&self.data.work_dir)?;
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{} must be a number, got '{}'", key, value)))
}

/// Locates and loads the bootstrap configuration for one binary
pub struct ConfigResolver {
    module_name: String,
    cli_path: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_path: None,
        }
    }

    /// Config path given on the command line (highest priority)
    pub fn with_cli_path(mut self, path: Option<PathBuf>) -> Self {
        self.cli_path = path;
        self
    }

    /// Find the config file to read, if any
    ///
    /// Priority: CLI path → `SPT_CONFIG` → `./spt.toml` →
    /// `<config_dir>/spt/config.toml`
    pub fn resolve_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli_path {
            return Some(path.clone());
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        dirs::config_dir()
            .map(|d| d.join("spt").join("config.toml"))
            .filter(|p| p.exists())
    }

    /// Load file (if any), then apply environment overrides.
    ///
    /// An explicitly requested file that does not exist is an error; a
    /// missing default location only produces a warning.
    pub fn load(&self) -> Result<TomlConfig> {
        let mut config = match self.resolve_path() {
            Some(path) => load_toml_file(&path, self.cli_path.is_some())?,
            None => {
                warn!(
                    module = %self.module_name,
                    "No config file found, using defaults and environment"
                );
                TomlConfig::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }
}

fn load_toml_file(path: &Path, explicit: bool) -> Result<TomlConfig> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            info!("Loaded config file: {}", path.display());
            TomlConfig::from_toml_str(&content)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            warn!("Config file not found: {}, using defaults", path.display());
            Ok(TomlConfig::default())
        }
        Err(e) => Err(Error::Config(format!(
            "Read config {} failed: {}",
            path.display(),
            e
        ))),
    }
}
