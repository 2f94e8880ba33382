use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::retrieve::request_client::{FetchError, RateLimitPolicy, RequestClient};
use crate::retrieve::transport::{TransportOptions, DEFAULT_RETRY_STATUSES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// # Client Config
///
/// Settings of the shared request client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Per-attempt timeout in seconds.
    pub timeout_secs: u64,
    /// Transport retries on connection failures and `retry_statuses`.
    pub transport_retries: u32,
    /// Shortest exponential backoff interval in milliseconds.
    pub backoff_min_ms: u64,
    /// Longest exponential backoff interval in milliseconds.
    pub backoff_max_ms: u64,
    /// Status codes retried by the transport.
    pub retry_statuses: Vec<u16>,
    /// Maximum rate-limit waits per request; `null` means unbounded.
    pub rate_limit_max_waits: Option<u32>,
    /// Maximum accumulated rate-limit wait per request; `null` means unbounded.
    pub rate_limit_max_wait_secs: Option<u64>,
    /// `User-Agent` header.
    pub user_agent: Option<String>,
    /// Extra headers sent with every request.
    pub default_headers: BTreeMap<String, String>,
    /// Header carrying the API key, e.g. `X-API-Key`.
    pub api_key_header: Option<String>,
    /// API key for providers that require one.
    pub api_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let transport = TransportOptions::default();
        let rate_limit = RateLimitPolicy::default();
        Self {
            timeout_secs: transport.timeout.as_secs(),
            transport_retries: transport.max_retries,
            backoff_min_ms: transport.backoff_min.as_millis() as u64,
            backoff_max_ms: transport.backoff_max.as_millis() as u64,
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
            rate_limit_max_waits: rate_limit.max_waits,
            rate_limit_max_wait_secs: rate_limit.max_total_wait.map(|d| d.as_secs()),
            user_agent: transport.user_agent,
            default_headers: BTreeMap::new(),
            api_key_header: None,
            api_key: None,
        }
    }
}

impl ClientConfig {
    /// Transport settings derived from this config.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.transport_retries,
            backoff_min: Duration::from_millis(self.backoff_min_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            retry_statuses: self.retry_statuses.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Rate-limit budget derived from this config.
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            max_waits: self.rate_limit_max_waits,
            max_total_wait: self.rate_limit_max_wait_secs.map(Duration::from_secs),
        }
    }

    /// Default headers plus the API key header, when both parts are set.
    pub fn header_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .default_headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let (Some(header), Some(key)) = (&self.api_key_header, &self.api_key) {
            pairs.push((header.clone(), key.clone()));
        }
        pairs
    }

    /// Builds the request client described by this config.
    pub fn build_client(&self) -> Result<RequestClient, FetchError> {
        let mut client =
            RequestClient::with_options(&self.transport_options(), self.rate_limit_policy())?;
        client.set_default_headers(self.header_pairs())?;
        Ok(client)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeoutSecs must be greater than zero".into()));
        }
        if self.backoff_min_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoffMinMs ({}) is larger than backoffMaxMs ({})",
                self.backoff_min_ms, self.backoff_max_ms
            )));
        }
        if let Some(bad) = self.retry_statuses.iter().find(|s| !(100..=599).contains(*s)) {
            return Err(ConfigError::Invalid(format!("retryStatuses contains {bad}")));
        }
        if self.api_key.is_some() && self.api_key_header.is_none() {
            return Err(ConfigError::Invalid("apiKey is set but apiKeyHeader is not".into()));
        }
        Ok(())
    }
}

/// # App Config
///
/// Everything a coinfetch tool needs besides its own flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Request client settings.
    pub client: ClientConfig,
    /// Directory for exported files.
    pub output_path: PathBuf,
    /// Connection string of the metadata store.
    pub database_url: Option<String>,
    /// Directory for log files; no file logging when unset.
    pub log_dir: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            output_path: PathBuf::from("."),
            database_url: None,
            log_dir: None,
            log_level: "info".to_string(),
        }
    }
}

/// # Config Args
///
/// Settings that can be given as flags or environment variables. Every field
/// is optional; a value that is set overrides the config file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON configuration file.
    #[arg(long = "config", global = true, env = "COINFETCH_CONFIG")]
    pub config_path: Option<PathBuf>,

    /// Per-attempt timeout in seconds.
    #[arg(long, global = true, env = "COINFETCH_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Transport retries on connection failures and retry statuses.
    #[arg(long, global = true, env = "COINFETCH_TRANSPORT_RETRIES")]
    pub transport_retries: Option<u32>,

    /// Shortest backoff interval in milliseconds.
    #[arg(long, global = true, env = "COINFETCH_BACKOFF_MIN_MS")]
    pub backoff_min_ms: Option<u64>,

    /// Longest backoff interval in milliseconds.
    #[arg(long, global = true, env = "COINFETCH_BACKOFF_MAX_MS")]
    pub backoff_max_ms: Option<u64>,

    /// Comma separated status codes retried by the transport.
    #[arg(long, global = true, env = "COINFETCH_RETRY_STATUSES", value_delimiter = ',')]
    pub retry_statuses: Option<Vec<u16>>,

    /// Maximum rate-limit waits per request.
    #[arg(long, global = true, env = "COINFETCH_RATE_LIMIT_MAX_WAITS")]
    pub rate_limit_max_waits: Option<u32>,

    /// Maximum accumulated rate-limit wait per request, in seconds.
    #[arg(long, global = true, env = "COINFETCH_RATE_LIMIT_MAX_WAIT_SECS")]
    pub rate_limit_max_wait_secs: Option<u64>,

    /// Keep waiting out HTTP 429 for as long as the server asks.
    #[arg(
        long,
        global = true,
        env = "COINFETCH_RATE_LIMIT_UNBOUNDED",
        conflicts_with_all = ["rate_limit_max_waits", "rate_limit_max_wait_secs"]
    )]
    pub rate_limit_unbounded: bool,

    /// User-Agent header.
    #[arg(long, global = true, env = "COINFETCH_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Header carrying the API key.
    #[arg(long, global = true, env = "COINFETCH_API_KEY_HEADER")]
    pub api_key_header: Option<String>,

    /// API key for providers that require one.
    #[arg(long, global = true, env = "COINFETCH_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Directory for exported files.
    #[arg(long, global = true, env = "COINFETCH_OUTPUT_PATH")]
    pub output_path: Option<PathBuf>,

    /// sqlite:... or postgres://... connection string.
    #[arg(long, global = true, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Directory for log files.
    #[arg(long, global = true, env = "COINFETCH_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log level or filter directives.
    #[arg(long, global = true, env = "COINFETCH_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Loads defaults, then the JSON file named by `args.config_path` (when
    /// present), then the values set in `args`.
    pub fn load(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let config = match &args.config_path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                info!(path = %p.display(), "config file not found, using defaults and environment");
                Self::default()
            }
            None => Self::default(),
        };

        let config = config.merge(args.clone());
        config.client.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file; absent fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;
        config.client.validate()?;
        Ok(config)
    }

    /// Overrides fields with the values set in `args`.
    pub fn merge(self, args: ConfigArgs) -> Self {
        let client = self.client;
        let (rate_limit_max_waits, rate_limit_max_wait_secs) = if args.rate_limit_unbounded {
            (None, None)
        } else {
            (
                args.rate_limit_max_waits.or(client.rate_limit_max_waits),
                args.rate_limit_max_wait_secs.or(client.rate_limit_max_wait_secs),
            )
        };

        AppConfig {
            client: ClientConfig {
                timeout_secs: args.timeout_secs.unwrap_or(client.timeout_secs),
                transport_retries: args.transport_retries.unwrap_or(client.transport_retries),
                backoff_min_ms: args.backoff_min_ms.unwrap_or(client.backoff_min_ms),
                backoff_max_ms: args.backoff_max_ms.unwrap_or(client.backoff_max_ms),
                retry_statuses: args.retry_statuses.unwrap_or(client.retry_statuses),
                rate_limit_max_waits,
                rate_limit_max_wait_secs,
                user_agent: args.user_agent.or(client.user_agent),
                default_headers: client.default_headers,
                api_key_header: args.api_key_header.or(client.api_key_header),
                api_key: args.api_key.or(client.api_key),
            },
            output_path: args.output_path.unwrap_or(self.output_path),
            database_url: args.database_url.or(self.database_url),
            log_dir: args.log_dir.or(self.log_dir),
            log_level: args.log_level.unwrap_or(self.log_level),
        }
    }
}
