//! Startup configuration (`config.json` by default).
//!
//! The file is read exactly once, before the poller starts. Anything missing or
//! malformed is a [`ConfigError`] and the process exits with status 1. Files
//! ending in `.toml` are parsed as TOML, everything else as JSON; both map onto
//! the same document shape:
//!
//! ```json
//! {
//!   "cache_limit": 500,
//!   "parser": {
//!     "url": "https://tracker.example/tracker.php",
//!     "interval": 5,
//!     "cookies": { "bb_session": "..." }
//!   }
//! }
//! ```
use regex::Regex;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::{validate_http_url, FeedFormat};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_DELUGE_URL: &str = "http://127.0.0.1:8112/json";
const DEFAULT_DELUGE_PASSWORD: &str = "deluge";
const DEFAULT_DELUGE_ATTEMPTS: u32 = 3;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in config file: {0}")]
    Json(#[source] serde_json::Error),

    #[error("Invalid TOML in config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A key is present but has the wrong shape (e.g. a string where a number belongs).
    #[error("Invalid configuration: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid or missing {0}")]
    Missing(&'static str),

    #[error("Invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Raw document
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawConfig {
    cache_limit: Option<i64>,
    parser: Option<RawParser>,
    #[serde(default)]
    deluge: RawDeluge,
}

#[derive(Debug, Deserialize)]
struct RawParser {
    url: Option<String>,
    interval: Option<u64>,
    timeout: Option<u64>,
    #[serde(default)]
    cookies: BTreeMap<String, String>,
    #[serde(default)]
    format: FeedFormat,
    title_pattern: Option<String>,
    url_pattern: Option<String>,
    #[serde(default)]
    selectors: SelectorConfig,
    #[serde(default)]
    allow_empty_seed: bool,
    dl_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDeluge {
    url: Option<String>,
    password: Option<String>,
    attempts: Option<u32>,
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// CSS selectors locating announcements on an HTML listing page.
///
/// Defaults match TorrentPier-style trackers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// One match per announcement row.
    pub row: String,
    /// Title anchor, relative to a row.
    pub title: String,
    /// Download anchor, relative to a row. Its `href` is the link.
    pub link: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            row: "tr.hl-tr".to_string(),
            title: "td.tLeft a.tLink".to_string(),
            link: r#"td.small a[title="Download"], td.small a.tr-dl"#.to_string(),
        }
    }
}

/// Fully validated configuration.
#[derive(Debug)]
pub struct Config {
    /// Dedup cache capacity.
    pub cache_limit: NonZeroUsize,
    pub parser: ParserConfig,
    pub deluge: DelugeConfig,
}

#[derive(Debug)]
pub struct ParserConfig {
    /// Feed or tracker listing URL. Also the base for relative links.
    pub url: Url,
    pub interval: Duration,
    /// Bound on a single fetch, including the body read.
    pub timeout: Duration,
    /// Opaque session cookies, sent verbatim.
    pub cookies: BTreeMap<String, SecretString>,
    pub format: FeedFormat,
    pub title_pattern: Option<Regex>,
    pub url_pattern: Option<Regex>,
    pub selectors: SelectorConfig,
    /// Accept a first fetch with no announcements instead of treating it as
    /// expired credentials.
    pub allow_empty_seed: bool,
    pub dl_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct DelugeConfig {
    /// Deluge Web JSON-RPC endpoint.
    pub url: Url,
    pub password: SecretString,
    pub attempts: u32,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 3] = ["cache_limit", "parser", "deluge"];

    /// Load and validate the configuration file at `path`.
    ///
    /// Unlike optional preference files, a missing file is an error here.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let meta = std::fs::metadata(path).map_err(io_err)?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path).map_err(io_err)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };

        tracing::info!(
            path = %path.display(),
            url = %config.parser.url,
            format = ?config.parser.format,
            interval_secs = config.parser.interval.as_secs(),
            cache_limit = config.cache_limit.get(),
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = serde_json::from_str(content).map_err(ConfigError::Json)?;
        Self::from_value(value)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let value: serde_json::Value = toml::from_str(content)?;
        Self::from_value(value)
    }

    fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        if let Some(table) = value.as_object() {
            for key in table.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let raw: RawConfig = serde_json::from_value(value).map_err(ConfigError::Schema)?;
        raw.validate()
    }

    /// Download directory for the daemon-triggering sink.
    pub fn require_dl_path(&self) -> Result<&Path, ConfigError> {
        self.parser
            .dl_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::Missing("download path (parser.dl_path)"))
    }
}

impl RawConfig {
    fn validate(self) -> Result<Config, ConfigError> {
        let limit = self
            .cache_limit
            .ok_or(ConfigError::Missing("cache_limit"))?;
        let cache_limit = usize::try_from(limit)
            .ok()
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| ConfigError::Invalid {
                key: "cache_limit",
                reason: format!("must be a positive integer, got {limit}"),
            })?;

        let parser = self.parser.ok_or(ConfigError::Missing("parser section"))?;
        let parser = parser.validate()?;
        let deluge = self.deluge.validate()?;

        Ok(Config {
            cache_limit,
            parser,
            deluge,
        })
    }
}

impl RawParser {
    fn validate(self) -> Result<ParserConfig, ConfigError> {
        let raw_url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or(ConfigError::Missing("tracker url (parser.url)"))?;
        let url = validate_http_url(raw_url.trim()).map_err(|e| ConfigError::Invalid {
            key: "parser.url",
            reason: e.to_string(),
        })?;

        let interval_secs = self.interval.unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "parser.interval",
                reason: "must be at least 1 second".to_string(),
            });
        }
        let timeout_secs = self.timeout.unwrap_or(interval_secs);
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "parser.timeout",
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(ParserConfig {
            url,
            interval: Duration::from_secs(interval_secs),
            timeout: Duration::from_secs(timeout_secs),
            cookies: self
                .cookies
                .into_iter()
                .map(|(name, value)| (name, SecretString::from(value)))
                .collect(),
            format: self.format,
            title_pattern: compile_pattern("parser.title_pattern", self.title_pattern)?,
            url_pattern: compile_pattern("parser.url_pattern", self.url_pattern)?,
            selectors: self.selectors,
            allow_empty_seed: self.allow_empty_seed,
            dl_path: self.dl_path,
        })
    }
}

impl RawDeluge {
    fn validate(self) -> Result<DelugeConfig, ConfigError> {
        let raw_url = self.url.unwrap_or_else(|| DEFAULT_DELUGE_URL.to_string());
        let url = validate_http_url(&raw_url).map_err(|e| ConfigError::Invalid {
            key: "deluge.url",
            reason: e.to_string(),
        })?;

        let attempts = self.attempts.unwrap_or(DEFAULT_DELUGE_ATTEMPTS);
        if attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "deluge.attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(DelugeConfig {
            url,
            password: SecretString::from(
                self.password
                    .unwrap_or_else(|| DEFAULT_DELUGE_PASSWORD.to_string()),
            ),
            attempts,
        })
    }
}

fn compile_pattern(key: &'static str, pattern: Option<String>) -> Result<Option<Regex>, ConfigError> {
    pattern
        .map(|p| {
            Regex::new(&p).map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            })
        })
        .transpose()
}

// ============================================================================
// Tests
// ============================================================================
