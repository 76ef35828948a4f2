//! Browser session loading.
//!
//! The session is the `storage_state` JSON a browser automation tool exports
//! after an interactive login:
//!
//! ```json
//! {"cookies": [{"name": "session-id", "value": "...", "domain": ".amazon.com",
//!               "path": "/", "expires": 1767225600.0}], "origins": []}
//! ```

use crate::error::{AmazonPhotosError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

#[derive(Debug, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    domain: String,
    /// Unix seconds; `-1` or absent for session cookies
    #[serde(default)]
    expires: Option<f64>,
}

impl StoredCookie {
    fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        host == domain || host.ends_with(&format!(".{}", domain))
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires
            .is_some_and(|expires| expires > 0.0 && (expires as i64) <= now)
    }
}

/// Cookies authorising requests against one host.
#[derive(Clone)]
pub struct Session {
    host: String,
    cookie_header: String,
    cookie_count: usize,
}

impl Session {
    /// Load a storage-state file, keeping unexpired cookies for `host`.
    ///
    /// # Errors
    ///
    /// [`AmazonPhotosError::SessionMissing`] when no usable cookie remains.
    pub async fn from_storage_state_file(path: &Path, host: &str, now: i64) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            AmazonPhotosError::SessionMissing(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_storage_state(&json, host, now)
    }

    pub fn from_storage_state(json: &str, host: &str, now: i64) -> Result<Self> {
        let state: StorageState = serde_json::from_str(json)
            .map_err(|e| AmazonPhotosError::SessionInvalid(e.to_string()))?;

        let cookies: Vec<_> = state
            .cookies
            .iter()
            .filter(|cookie| cookie.matches_host(host) && !cookie.is_expired(now))
            .map(|cookie| format!("{}={}", cookie.name, cookie.value))
            .collect();

        if cookies.is_empty() {
            return Err(AmazonPhotosError::SessionMissing(format!(
                "no unexpired cookies for {}",
                host
            )));
        }

        debug!(host, cookies = cookies.len(), "Loaded session cookies");

        Ok(Self {
            host: host.to_string(),
            cookie_count: cookies.len(),
            cookie_header: cookies.join("; "),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn cookie_count(&self) -> usize {
        self.cookie_count
    }

    pub(crate) fn cookie_header(&self) -> &str {
        &self.cookie_header
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("cookie_count", &self.cookie_count)
            .field("cookie_header", &"[REDACTED]")
            .finish()
    }
}
