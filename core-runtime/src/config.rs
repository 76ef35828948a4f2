//! # Vault Configuration Module
//!
//! Provides configuration management for the sync engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a [`VaultConfig`]
//! holding every tunable the engine reads: where the manifest and the
//! content-addressed storage live, how wide the download pool is, and the
//! retry, timeout and reconciliation thresholds. Validation is fail-fast with
//! actionable messages.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::VaultConfig;
//! use std::time::Duration;
//!
//! let config = VaultConfig::builder()
//!     .database_path("/srv/vault/manifest.db")
//!     .storage_root("/srv/vault/objects")
//!     .concurrency_limit(8)
//!     .request_timeout(Duration::from_secs(300))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for the download worker pool.
pub const MAX_CONCURRENCY: usize = 64;

/// Which slice of the remote library an enumeration pass asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumerationMode {
    /// Only items modified since the last successful enumeration checkpoint
    Incremental,
    /// Every item in the library
    Full,
}

impl EnumerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnumerationMode::Incremental => "incremental",
            EnumerationMode::Full => "full",
        }
    }
}

impl FromStr for EnumerationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "incremental" => Ok(EnumerationMode::Incremental),
            "full" => Ok(EnumerationMode::Full),
            _ => Err(Error::Config(format!("Unknown enumeration mode: {}", s))),
        }
    }
}

impl fmt::Display for EnumerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bounded exponential backoff, expressed as data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    ///
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .checked_mul(2u32.pow(exponent))
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made` failures.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Engine configuration.
///
/// Use [`VaultConfig::builder`] to construct instances.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Path to the SQLite manifest database
    pub database_path: PathBuf,

    /// Root directory of the content-addressed storage
    pub storage_root: PathBuf,

    /// Items requested per listing page
    pub page_size: u32,

    /// Number of concurrent download workers
    pub concurrency_limit: usize,

    /// Maximum wait for one listing page, for a fetch to respond, or for the
    /// next chunk of a fetch. A transfer that keeps making progress is not
    /// bounded by it.
    pub request_timeout: Duration,

    /// Backoff for transient remote failures
    pub retry: RetryPolicy,

    /// Number of full re-fetches after a hash or size mismatch
    pub integrity_retries: u32,

    /// Age after which a `Downloading` claim is considered abandoned
    pub liveness_threshold: Duration,

    /// Age after which a `Failed` item becomes eligible again
    pub failed_cooldown: Duration,

    /// Enumeration mode used by drift verification
    pub verify_mode: EnumerationMode,

    /// Size of the manifest connection pool
    pub database_max_connections: u32,
}

impl VaultConfig {
    /// Creates a new builder for constructing a `VaultConfig`.
    pub fn builder() -> VaultConfigBuilder {
        VaultConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Paths are not empty and do not point at the same location
    /// - Page size and worker count are within bounds
    /// - Timeouts and retry attempts are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.storage_root.as_os_str().is_empty() {
            return Err(Error::Config("Storage root cannot be empty".to_string()));
        }

        if self.database_path == self.storage_root {
            return Err(Error::Config(
                "Database path and storage root must differ. \
                 Keep the manifest outside the content-addressed tree."
                    .to_string(),
            ));
        }

        if self.page_size == 0 {
            return Err(Error::Config(
                "Page size must be greater than 0".to_string(),
            ));
        }

        if self.concurrency_limit == 0 || self.concurrency_limit > MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "Concurrency limit must be between 1 and {}, got {}",
                MAX_CONCURRENCY, self.concurrency_limit
            )));
        }

        if self.request_timeout.is_zero() {
            return Err(Error::Config(
                "Request timeout must be greater than 0".to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "Retry policy needs at least one attempt".to_string(),
            ));
        }

        if self.liveness_threshold < self.request_timeout {
            return Err(Error::Config(format!(
                "Liveness threshold ({}s) must not be shorter than the request timeout ({}s); \
                 live downloads would be requeued",
                self.liveness_threshold.as_secs(),
                self.request_timeout.as_secs()
            )));
        }

        if self.database_max_connections == 0 {
            return Err(Error::Config(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for [`VaultConfig`].
#[derive(Debug, Default)]
pub struct VaultConfigBuilder {
    database_path: Option<PathBuf>,
    storage_root: Option<PathBuf>,
    page_size: Option<u32>,
    concurrency_limit: Option<usize>,
    request_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    integrity_retries: Option<u32>,
    liveness_threshold: Option<Duration>,
    failed_cooldown: Option<Duration>,
    verify_mode: Option<EnumerationMode>,
    database_max_connections: Option<u32>,
}

impl VaultConfigBuilder {
    /// Sets the manifest database path.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the content-addressed storage root.
    pub fn storage_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.storage_root = Some(path.into());
        self
    }

    /// Default: 200
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Default: 4
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    /// Default: 120 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Default: 3 attempts, 1 second base delay, 60 second cap
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Default: 1
    pub fn integrity_retries(mut self, retries: u32) -> Self {
        self.integrity_retries = Some(retries);
        self
    }

    /// Default: 15 minutes
    pub fn liveness_threshold(mut self, threshold: Duration) -> Self {
        self.liveness_threshold = Some(threshold);
        self
    }

    /// Default: 1 hour
    pub fn failed_cooldown(mut self, cooldown: Duration) -> Self {
        self.failed_cooldown = Some(cooldown);
        self
    }

    /// Default: [`EnumerationMode::Full`]
    pub fn verify_mode(mut self, mode: EnumerationMode) -> Self {
        self.verify_mode = Some(mode);
        self
    }

    /// Default: 5
    pub fn database_max_connections(mut self, max: u32) -> Self {
        self.database_max_connections = Some(max);
        self
    }

    /// Builds the final `VaultConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if a required path is missing or any value fails
    /// [`VaultConfig::validate`].
    pub fn build(self) -> Result<VaultConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let storage_root = self.storage_root.ok_or_else(|| {
            Error::Config("Storage root is required. Use .storage_root() to set it.".to_string())
        })?;

        let config = VaultConfig {
            database_path,
            storage_root,
            page_size: self.page_size.unwrap_or(200),
            concurrency_limit: self.concurrency_limit.unwrap_or(4),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(120)),
            retry: self.retry.unwrap_or_default(),
            integrity_retries: self.integrity_retries.unwrap_or(1),
            liveness_threshold: self
                .liveness_threshold
                .unwrap_or(Duration::from_secs(15 * 60)),
            failed_cooldown: self.failed_cooldown.unwrap_or(Duration::from_secs(60 * 60)),
            verify_mode: self.verify_mode.unwrap_or(EnumerationMode::Full),
            database_max_connections: self.database_max_connections.unwrap_or(5),
        };

        config.validate()?;

        Ok(config)
    }
}
