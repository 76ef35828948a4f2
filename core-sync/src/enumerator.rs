//! # Remote Enumerator
//!
//! Walks the remote library page by page and yields item descriptors one at a
//! time, holding at most one page in memory.
//!
//! ## Modes
//!
//! - `Full` asks for every item.
//! - `Incremental` asks for items modified at or after the checkpoint of the
//!   last completed enumeration. Without a checkpoint it behaves like `Full`.
//!
//! Providers are not trusted to apply the `modified_since` filter, so items
//! older than the checkpoint are also dropped client side.
//!
//! Page requests that fail transiently or time out are retried with
//! exponential backoff. A page that still fails ends the scan early; the
//! caller must then leave the previous checkpoint untouched.

use crate::repository::SyncRunRepository;
use crate::{Result, SyncError};
use bridge_traits::{Clock, Page, PageRequest, RemoteItemDescriptor, RemoteLibrary};
use core_runtime::{EnumerationMode, RetryPolicy, VaultConfig};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RemoteEnumerator {
    remote: Arc<dyn RemoteLibrary>,
    runs: Arc<dyn SyncRunRepository>,
    clock: Arc<dyn Clock>,
    page_size: u32,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl RemoteEnumerator {
    pub fn new(
        remote: Arc<dyn RemoteLibrary>,
        runs: Arc<dyn SyncRunRepository>,
        clock: Arc<dyn Clock>,
        config: &VaultConfig,
    ) -> Self {
        Self {
            remote,
            runs,
            clock,
            page_size: config.page_size,
            retry: config.retry,
            request_timeout: config.request_timeout,
        }
    }

    /// Start a lazy pass over the remote library.
    pub async fn enumerate(&self, mode: EnumerationMode) -> Result<RemoteScan<'_>> {
        let since = match mode {
            EnumerationMode::Full => None,
            EnumerationMode::Incremental => {
                let checkpoint = self.runs.latest_checkpoint().await?;
                if checkpoint.is_none() {
                    info!("No enumeration checkpoint yet, listing the full library");
                }
                checkpoint
            }
        };

        let started_at = self.clock.unix_timestamp();
        info!(mode = %mode, since = ?since, "Starting remote enumeration");

        Ok(RemoteScan {
            enumerator: self,
            mode,
            since,
            started_at,
            next_request: Some(PageRequest::first(self.page_size).modified_since(since)),
            buffer: VecDeque::new(),
            stats: ScanStats::default(),
        })
    }

    async fn fetch_page(&self, request: &PageRequest) -> Result<Page> {
        let mut failures = 0u32;

        loop {
            let attempt =
                tokio::time::timeout(self.request_timeout, self.remote.list_page(request)).await;

            let error = match attempt {
                Ok(Ok(page)) => return Ok(page),
                Ok(Err(e)) => SyncError::from(e),
                Err(_) => SyncError::TransientIo(format!(
                    "page request timed out after {}s",
                    self.request_timeout.as_secs()
                )),
            };

            failures += 1;
            if !error.is_retryable() || !self.retry.allows_retry(failures) {
                return Err(error);
            }

            let delay = self.retry.delay_for(failures);
            warn!(
                cursor = ?request.cursor,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Page request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Counters for one enumeration pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub pages: u64,
    pub yielded: u64,
    /// Items dropped by the client-side `modified_since` filter
    pub filtered: u64,
}

/// An enumeration pass in progress.
pub struct RemoteScan<'a> {
    enumerator: &'a RemoteEnumerator,
    mode: EnumerationMode,
    since: Option<i64>,
    started_at: i64,
    next_request: Option<PageRequest>,
    buffer: VecDeque<RemoteItemDescriptor>,
    stats: ScanStats,
}

impl RemoteScan<'_> {
    /// Next item of the pass, or `None` once the last page is drained.
    ///
    /// After an error the failed page is kept, so calling again retries it.
    pub async fn next_item(&mut self) -> Result<Option<RemoteItemDescriptor>> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                if self.since.is_some_and(|since| item.modified_at < since) {
                    self.stats.filtered += 1;
                    continue;
                }
                self.stats.yielded += 1;
                return Ok(Some(item));
            }

            let Some(request) = self.next_request.take() else {
                return Ok(None);
            };

            let page = match self.enumerator.fetch_page(&request).await {
                Ok(page) => page,
                Err(e) => {
                    self.next_request = Some(request);
                    return Err(e);
                }
            };

            self.stats.pages += 1;
            debug!(
                page = self.stats.pages,
                items = page.items.len(),
                last = page.is_last(),
                "Fetched remote page"
            );

            self.next_request = page.next_cursor.map(|cursor| request.next(cursor));
            self.buffer.extend(page.items);
        }
    }

    /// Whether every page has been fetched and drained.
    pub fn is_complete(&self) -> bool {
        self.next_request.is_none() && self.buffer.is_empty()
    }

    pub fn mode(&self) -> EnumerationMode {
        self.mode
    }

    /// Lower bound applied to remote modification times, if any.
    pub fn since(&self) -> Option<i64> {
        self.since
    }

    /// Start of the pass; becomes the next checkpoint if the pass completes.
    pub fn started_at(&self) -> i64 {
        self.started_at
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }
}
