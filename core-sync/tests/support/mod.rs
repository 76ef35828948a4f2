//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::{ByteStream, ManualClock, Page, PageRequest, RemoteItemDescriptor, RemoteLibrary};
use bytes::Bytes;
use core_manifest::{create_pool, DatabaseConfig};
use core_runtime::{RetryPolicy, VaultConfig, VaultConfigBuilder};
use core_sync::SyncController;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex as AsyncMutex;

pub const START: i64 = 1_700_000_000;

// ============================================================================
// Mock Remote Library
// ============================================================================

/// Failure modes the mock can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transient,
    AuthExpired,
    NotFound,
    /// Deliver the first half of the content, then drop the connection
    MidStream,
}

impl Failure {
    fn into_error(self, remote_id: &str) -> BridgeError {
        match self {
            Failure::Transient => BridgeError::Transient("HTTP 503".to_string()),
            Failure::MidStream => BridgeError::Transient("connection reset".to_string()),
            Failure::AuthExpired => BridgeError::AuthExpired("HTTP 401".to_string()),
            Failure::NotFound => BridgeError::NotFound {
                remote_id: remote_id.to_string(),
            },
        }
    }
}

/// In-memory remote library with scripted failures.
#[derive(Default)]
pub struct MockLibrary {
    items: AsyncMutex<Vec<RemoteItemDescriptor>>,
    content: AsyncMutex<HashMap<String, Vec<u8>>>,
    fetch_failures: AsyncMutex<HashMap<String, VecDeque<Failure>>>,
    persistent_fetch_failures: AsyncMutex<HashMap<String, Failure>>,
    /// Cursor at which every listing request fails
    listing_failure: AsyncMutex<Option<(String, Failure)>>,
    /// Delay before each single-byte chunk
    throttles: AsyncMutex<HashMap<String, Duration>>,
    fetch_counts: AsyncMutex<HashMap<String, u32>>,
    list_requests: AsyncMutex<Vec<PageRequest>>,
}

impl MockLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, remote_id: &str, display_name: &str, modified_at: i64, bytes: &[u8]) {
        let descriptor =
            RemoteItemDescriptor::new(remote_id, display_name, modified_at, bytes.len() as u64)
                .with_content_type("image/jpeg");
        self.items.lock().await.push(descriptor);
        self.content
            .lock()
            .await
            .insert(remote_id.to_string(), bytes.to_vec());
    }

    /// Make the listing report a size that does not match the content.
    pub async fn misdeclare_size(&self, remote_id: &str, byte_size: u64) {
        for item in self.items.lock().await.iter_mut() {
            if item.remote_id == remote_id {
                item.byte_size = byte_size;
            }
        }
    }

    pub async fn declare_md5(&self, remote_id: &str, md5: &str) {
        for item in self.items.lock().await.iter_mut() {
            if item.remote_id == remote_id {
                item.declared_md5 = Some(md5.to_string());
            }
        }
    }

    /// Stream the content one byte at a time, each after `delay`.
    pub async fn throttle(&self, remote_id: &str, delay: Duration) {
        self.throttles
            .lock()
            .await
            .insert(remote_id.to_string(), delay);
    }

    pub async fn fail_fetch(&self, remote_id: &str, failures: Vec<Failure>) {
        self.fetch_failures
            .lock()
            .await
            .insert(remote_id.to_string(), failures.into());
    }

    pub async fn always_fail_fetch(&self, remote_id: &str, failure: Failure) {
        self.persistent_fetch_failures
            .lock()
            .await
            .insert(remote_id.to_string(), failure);
    }

    pub async fn heal_fetch(&self, remote_id: &str) {
        self.persistent_fetch_failures.lock().await.remove(remote_id);
        self.fetch_failures.lock().await.remove(remote_id);
    }

    pub async fn fail_listing_at(&self, cursor: &str, failure: Failure) {
        *self.listing_failure.lock().await = Some((cursor.to_string(), failure));
    }

    pub async fn heal_listing(&self) {
        *self.listing_failure.lock().await = None;
    }

    pub async fn fetch_count(&self, remote_id: &str) -> u32 {
        self.fetch_counts
            .lock()
            .await
            .get(remote_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn list_requests(&self) -> Vec<PageRequest> {
        self.list_requests.lock().await.clone()
    }
}

#[async_trait]
impl RemoteLibrary for MockLibrary {
    async fn list_page(&self, request: &PageRequest) -> BridgeResult<Page> {
        self.list_requests.lock().await.push(request.clone());

        let cursor = request.cursor.clone().unwrap_or_else(|| "0".to_string());
        if let Some((failing, failure)) = self.listing_failure.lock().await.as_ref() {
            if *failing == cursor {
                return Err(failure.into_error("listing"));
            }
        }

        let visible: Vec<_> = self
            .items
            .lock()
            .await
            .iter()
            .filter(|item| {
                request
                    .modified_since
                    .map_or(true, |since| item.modified_at >= since)
            })
            .cloned()
            .collect();

        let start: usize = cursor.parse().unwrap();
        let end = (start + request.page_size as usize).min(visible.len());
        let next = (end < visible.len()).then(|| end.to_string());
        Ok(Page::new(visible[start.min(end)..end].to_vec(), next))
    }

    async fn fetch_bytes(&self, remote_id: &str) -> BridgeResult<ByteStream> {
        *self
            .fetch_counts
            .lock()
            .await
            .entry(remote_id.to_string())
            .or_default() += 1;

        if let Some(failure) = self.persistent_fetch_failures.lock().await.get(remote_id) {
            return Err(failure.into_error(remote_id));
        }
        let scripted = self
            .fetch_failures
            .lock()
            .await
            .get_mut(remote_id)
            .and_then(|queue| queue.pop_front());
        if let Some(failure) = scripted.filter(|f| *f != Failure::MidStream) {
            return Err(failure.into_error(remote_id));
        }

        let bytes = self
            .content
            .lock()
            .await
            .get(remote_id)
            .cloned()
            .ok_or_else(|| BridgeError::NotFound {
                remote_id: remote_id.to_string(),
            })?;

        if let Some(delay) = self.throttles.lock().await.get(remote_id).copied() {
            let trickle = futures::stream::iter(bytes).then(move |byte| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, BridgeError>(Bytes::copy_from_slice(&[byte]))
            });
            return Ok(trickle.boxed());
        }

        let middle = bytes.len() / 2;
        let tail = match scripted {
            Some(failure @ Failure::MidStream) => Err(failure.into_error(remote_id)),
            _ => Ok(Bytes::copy_from_slice(&bytes[middle..])),
        };
        let chunks = vec![Ok(Bytes::copy_from_slice(&bytes[..middle])), tail];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub dir: TempDir,
    pub controller: SyncController,
    pub library: Arc<MockLibrary>,
    pub clock: Arc<ManualClock>,
    pub pool: SqlitePool,
}

impl Harness {
    pub fn storage_root(&self) -> PathBuf {
        self.dir.path().join("vault")
    }
}

pub fn config(dir: &TempDir) -> VaultConfig {
    builder(dir).build().unwrap()
}

pub fn builder(dir: &TempDir) -> VaultConfigBuilder {
    VaultConfig::builder()
        .database_path(dir.path().join("manifest.db"))
        .storage_root(dir.path().join("vault"))
        .page_size(2)
        .concurrency_limit(4)
        .request_timeout(Duration::from_secs(5))
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(1)))
        .integrity_retries(1)
        .liveness_threshold(Duration::from_secs(15 * 60))
        .failed_cooldown(Duration::from_secs(60 * 60))
}

pub async fn harness(library: MockLibrary) -> Harness {
    harness_with(library, |builder| builder).await
}

/// Build a harness whose configuration is adjusted by `tune`.
pub async fn harness_with(
    library: MockLibrary,
    tune: impl FnOnce(VaultConfigBuilder) -> VaultConfigBuilder,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = tune(builder(&dir)).build().unwrap();
    let pool = create_pool(DatabaseConfig::new(&config.database_path))
        .await
        .unwrap();
    let library = Arc::new(library);
    let clock = Arc::new(ManualClock::new(START));

    let controller = SyncController::with_pool(config, pool.clone(), library.clone(), clock.clone())
        .await
        .unwrap();

    Harness {
        dir,
        controller,
        library,
        clock,
        pool,
    }
}
