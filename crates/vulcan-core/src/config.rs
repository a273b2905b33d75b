//! Configuration types for Vulcan components.
//!
//! Settings are read from a TOML file (explicit `--config` path or the
//! platform config directory) and fall back to built-in defaults when no
//! file exists. Secrets such as API tokens are never stored here; they come
//! from the environment.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;

/// Per-service rate limit as declared in configuration.
///
/// `calls` admissions per `period_secs` seconds, plus an optional `burst`
/// allowance consumed above the steady-state rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub calls: u32,
    pub period_secs: u64,
    #[serde(default)]
    pub burst: u32,
}

impl RateLimitEntry {
    pub fn period(&self) -> Duration {
        Duration::from_secs(self.period_secs)
    }
}

/// Retry behavior for transient remote failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 1,
            max_delay_secs: 10,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Timeouts and identification for outbound fetches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub http_timeout_secs: u64,
    pub clone_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            http_timeout_secs: 30,
            clone_timeout_secs: 300,
            refresh_timeout_secs: 120,
            user_agent: "SmartContractSecurityCrawler/1.0".to_string(),
        }
    }
}

impl FetchSettings {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root directory for everything the tool writes.
    pub output_root: PathBuf,
    /// Optional path to the source catalog file.
    pub sources_file: Option<PathBuf>,
    /// Per-service rate limits, keyed by service name.
    pub rate_limits: HashMap<String, RateLimitEntry>,
    pub retry: RetrySettings,
    pub fetch: FetchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let mut rate_limits = HashMap::new();
        rate_limits.insert(
            "source-host".to_string(),
            RateLimitEntry {
                calls: 30,
                period_secs: 60,
                burst: 0,
            },
        );
        rate_limits.insert(
            "page-fetch".to_string(),
            RateLimitEntry {
                calls: 10,
                period_secs: 60,
                burst: 0,
            },
        );
        rate_limits.insert(
            "dataset-hub".to_string(),
            RateLimitEntry {
                calls: 10,
                period_secs: 60,
                burst: 0,
            },
        );
        Self {
            output_root: PathBuf::from("output"),
            sources_file: None,
            rate_limits,
            retry: RetrySettings::default(),
            fetch: FetchSettings::default(),
        }
    }
}

impl Settings {
    /// Loads settings from `path`, or from the default location when `path`
    /// is `None`.
    ///
    /// An explicit path must exist and parse; a missing file at the default
    /// location silently yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        match path {
            Some(explicit) => {
                let raw = std::fs::read_to_string(explicit)?;
                Self::parse(&raw, explicit)
            }
            None => {
                let Some(default_path) = default_config_path() else {
                    debug!("no platform config directory; using default settings");
                    return Ok(Self::default());
                };
                if !default_path.exists() {
                    debug!(path = %default_path.display(), "no config file; using default settings");
                    return Ok(Self::default());
                }
                let raw = std::fs::read_to_string(&default_path)?;
                Self::parse(&raw, &default_path)
            }
        }
    }

    fn parse(raw: &str, origin: &Path) -> Result<Self, AppError> {
        toml::from_str(raw).map_err(|e| {
            AppError::Configuration(format!("cannot parse {}: {}", origin.display(), e))
        })
    }

    /// Where cloned repositories live.
    pub fn repos_dir(&self) -> PathBuf {
        self.output_root.join("repos")
    }

    /// Where raw page captures live.
    pub fn pages_dir(&self) -> PathBuf {
        self.output_root.join("pages")
    }

    /// Where dataset snapshots live.
    pub fn datasets_dir(&self) -> PathBuf {
        self.output_root.join("datasets")
    }

    /// Where run reports live.
    pub fn reports_dir(&self) -> PathBuf {
        self.output_root.join("reports")
    }
}

/// Returns the default config file path under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("vulcan").join("config.toml"))
}
