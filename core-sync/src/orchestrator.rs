//! # Download Orchestrator
//!
//! Drains the `PendingDownload` queue with a bounded pool of workers.
//!
//! ## Per-item workflow
//!
//! 1. The scheduler claims the record (`PendingDownload → Downloading`) and
//!    hands it to a worker. An item claimed elsewhere is skipped and does not
//!    count against the pass limit.
//! 2. Stream the remote bytes into a staging file while hashing them. The
//!    request timeout bounds the wait for the response and for each chunk,
//!    not the whole transfer.
//! 3. Check the received size and MD5 against what the remote declared.
//! 4. Known digest: drop the staging file and record a duplicate.
//! 5. New digest: re-hash the staged file, rename it into content storage and
//!    commit the entry.
//!
//! ## Failure handling
//!
//! - Transient failures and timeouts back off exponentially up to the retry
//!   policy's attempt limit, then mark the item `Failed`.
//! - Integrity mismatches are re-fetched a bounded number of times, then the
//!   item is marked `Failed`.
//! - Missing remote items and local disk errors mark the item `Failed`.
//! - Expired sessions and an unavailable manifest are fatal: the claim is
//!   released, no further items are claimed, in-flight workers finish, and
//!   the error is returned together with the report of the partial pass.
//!
//! Before the queue is drained, reconciliation requeues claims older than the
//! liveness threshold (interrupted runs) and failures past their cool-down.

use crate::content_store::{extension_for, ContentStore, StagedContent, StagingFile};
use crate::dedup::DedupIndex;
use crate::report::{DownloadReport, FailedItem, RunOutcome};
use crate::{Result, SyncError};
use bridge_traits::{Clock, RemoteLibrary};
use core_manifest::{
    CommitOutcome, ContentEntry, ManifestStore, RemoteItemRecord, StatePager, SyncState,
};
use core_runtime::{RetryPolicy, VaultConfig};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const QUEUE_PAGE_SIZE: u32 = 200;

// ============================================================================
// Options
// ============================================================================

/// Knobs for one download pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Maximum simultaneous transfers
    pub concurrency_limit: usize,
    /// Stop after claiming this many items
    pub limit: Option<usize>,
    /// Requeue `Failed` items whose cool-down has elapsed
    pub include_failed: bool,
}

impl DownloadOptions {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            limit: None,
            include_failed: true,
        }
    }

    pub fn with_concurrency(mut self, concurrency_limit: usize) -> Self {
        self.concurrency_limit = concurrency_limit;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_include_failed(mut self, include_failed: bool) -> Self {
        self.include_failed = include_failed;
        self
    }
}

/// Timing and retry limits applied to each transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPolicy {
    pub retry: RetryPolicy,
    /// Longest wait for the fetch response or for the next chunk
    pub request_timeout: Duration,
    /// Re-fetches allowed after an integrity mismatch
    pub integrity_retries: u32,
    pub liveness_threshold: Duration,
    pub failed_cooldown: Duration,
}

impl TransferPolicy {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            retry: config.retry,
            request_timeout: config.request_timeout,
            integrity_retries: config.integrity_retries,
            liveness_threshold: config.liveness_threshold,
            failed_cooldown: config.failed_cooldown,
        }
    }
}

/// A download pass stopped by a fatal error.
///
/// Items captured or failed before the error stay in `report`.
#[derive(Debug, thiserror::Error)]
#[error("Download aborted after {} attempted items: {error}", .report.attempted)]
pub struct AbortedPass {
    pub error: SyncError,
    /// What the pass achieved before it stopped
    pub report: DownloadReport,
}

impl AbortedPass {
    pub fn outcome(&self) -> RunOutcome {
        self.error.outcome()
    }
}

impl From<SyncError> for AbortedPass {
    fn from(error: SyncError) -> Self {
        Self {
            error,
            report: DownloadReport::default(),
        }
    }
}

impl From<AbortedPass> for SyncError {
    fn from(aborted: AbortedPass) -> Self {
        aborted.error
    }
}

/// Records moved back into the queue before a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub requeued_stale: u64,
    pub requeued_failed: u64,
    pub promoted: u64,
}

// ============================================================================
// Transfer Results
// ============================================================================

enum Transfer {
    /// Digest already stored; nothing new was written
    Known {
        content_hash: String,
        byte_size: u64,
        entry: ContentEntry,
    },
    /// Verified staging file ready to be promoted
    Novel(StagedContent),
}

enum ItemOutcome {
    Captured {
        commit: CommitOutcome,
        downloaded: u64,
    },
    NotClaimed,
    Failed(FailedItem),
    Released {
        remote_id: String,
        error: SyncError,
    },
}

// ============================================================================
// Orchestrator
// ============================================================================

#[derive(Clone)]
pub struct DownloadOrchestrator {
    store: Arc<dyn ManifestStore>,
    index: Arc<DedupIndex>,
    content: Arc<ContentStore>,
    remote: Arc<dyn RemoteLibrary>,
    clock: Arc<dyn Clock>,
    policy: TransferPolicy,
}

impl DownloadOrchestrator {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        index: Arc<DedupIndex>,
        content: Arc<ContentStore>,
        remote: Arc<dyn RemoteLibrary>,
        clock: Arc<dyn Clock>,
        policy: TransferPolicy,
    ) -> Self {
        Self {
            store,
            index,
            content,
            remote,
            clock,
            policy,
        }
    }

    /// Requeue interrupted and cooled-down items, then triage new ones.
    pub async fn reconcile(&self, include_failed: bool) -> Result<Reconciliation> {
        let now = self.clock.unix_timestamp();
        let liveness = self.policy.liveness_threshold.as_secs() as i64;
        let cooldown = self.policy.failed_cooldown.as_secs() as i64;

        let requeued_stale = self.store.requeue_stale_claims(now - liveness).await?;
        let requeued_failed = if include_failed {
            self.store.requeue_failed(now - cooldown).await?
        } else {
            0
        };
        let promoted = self.store.promote_discovered().await?;

        if requeued_stale > 0 || requeued_failed > 0 {
            info!(requeued_stale, requeued_failed, "Requeued items");
        }

        Ok(Reconciliation {
            requeued_stale,
            requeued_failed,
            promoted,
        })
    }

    /// Reconcile, then download every pending item.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error once in-flight workers have finished,
    /// along with the report of what was done before it. Per-item failures
    /// are reported in the [`DownloadReport`] instead.
    #[instrument(skip(self))]
    pub async fn process_pending(
        &self,
        options: &DownloadOptions,
    ) -> std::result::Result<DownloadReport, AbortedPass> {
        let mut report = DownloadReport::default();
        let reconciliation = match self.reconcile(options.include_failed).await {
            Ok(reconciliation) => reconciliation,
            Err(error) => return Err(AbortedPass { error, report }),
        };
        report.requeued_stale = reconciliation.requeued_stale;
        report.requeued_failed = reconciliation.requeued_failed;
        report.promoted = reconciliation.promoted;

        let semaphore = Arc::new(Semaphore::new(options.concurrency_limit.max(1)));
        let cancel = CancellationToken::new();
        let mut workers: JoinSet<ItemOutcome> = JoinSet::new();
        let mut fatal: Option<SyncError> = None;
        let mut claimed = 0usize;
        let mut pager = StatePager::new(
            self.store.as_ref(),
            SyncState::PendingDownload,
            QUEUE_PAGE_SIZE,
        );

        'schedule: loop {
            let page = match pager.next_page().await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(e) => {
                    fatal.get_or_insert(e.into());
                    cancel.cancel();
                    break;
                }
            };

            for candidate in page {
                if options.limit.is_some_and(|limit| claimed >= limit) {
                    break 'schedule;
                }

                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break 'schedule,
                };

                while let Some(joined) = workers.try_join_next() {
                    absorb(joined, &mut report, &mut fatal, &cancel);
                }
                if cancel.is_cancelled() {
                    break 'schedule;
                }

                let record = match self.store.claim_for_download(&candidate.remote_id).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        debug!(remote_id = %candidate.remote_id, "Item claimed elsewhere");
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        fatal.get_or_insert(e.into());
                        cancel.cancel();
                        break 'schedule;
                    }
                };
                claimed += 1;

                let worker = self.clone();
                let token = cancel.clone();
                workers.spawn(async move {
                    let _permit = permit;
                    worker.process_item(record, token).await
                });
            }
        }

        while let Some(joined) = workers.join_next().await {
            absorb(joined, &mut report, &mut fatal, &cancel);
        }

        if let Some(error) = fatal {
            error!(
                error = %error,
                verified = report.verified,
                duplicates = report.duplicates,
                failed = report.failed.len(),
                "Download pass aborted"
            );
            return Err(AbortedPass { error, report });
        }

        info!(
            attempted = report.attempted,
            verified = report.verified,
            duplicates = report.duplicates,
            failed = report.failed.len(),
            bytes = report.bytes_downloaded,
            "Download pass finished"
        );
        Ok(report)
    }

    #[instrument(skip(self, record, cancel), fields(remote_id = %record.remote_id))]
    async fn process_item(
        &self,
        record: RemoteItemRecord,
        cancel: CancellationToken,
    ) -> ItemOutcome {
        let outcome = self.transfer_claimed(record, &cancel).await;

        // Stop the scheduler before this worker's permit is returned.
        if let ItemOutcome::Released { error, .. } = &outcome {
            if error.is_fatal() {
                cancel.cancel();
            }
        }
        outcome
    }

    async fn transfer_claimed(
        &self,
        record: RemoteItemRecord,
        cancel: &CancellationToken,
    ) -> ItemOutcome {
        let result = match self.transfer_with_retry(&record, cancel).await {
            Ok(transfer) => self.commit(&record, transfer).await,
            Err(e) => Err(e),
        };
        let remote_id = record.remote_id;

        match result {
            Ok((commit, downloaded)) => ItemOutcome::Captured { commit, downloaded },
            Err(SyncError::ClaimLost { .. }) => {
                warn!("Claim lost before commit");
                ItemOutcome::NotClaimed
            }
            Err(e) if e.is_fatal() || matches!(e, SyncError::Cancelled) => {
                if let Err(release_error) = self.store.release_claim(&remote_id).await {
                    warn!(error = %release_error, "Failed to release claim");
                }
                ItemOutcome::Released { remote_id, error: e }
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(error = %reason, "Item failed");
                match self.store.mark_failed(&remote_id, &reason).await {
                    Ok(()) => ItemOutcome::Failed(FailedItem { remote_id, reason }),
                    Err(store_error) => ItemOutcome::Released {
                        remote_id,
                        error: store_error.into(),
                    },
                }
            }
        }
    }

    async fn transfer_with_retry(
        &self,
        record: &RemoteItemRecord,
        cancel: &CancellationToken,
    ) -> Result<Transfer> {
        let mut transient_failures = 0u32;
        let mut integrity_failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let error = match self.attempt_transfer(record).await {
                Ok(transfer) => return Ok(transfer),
                Err(e) => e,
            };

            if error.is_retryable() {
                transient_failures += 1;
                if !self.policy.retry.allows_retry(transient_failures) {
                    return Err(error);
                }

                let delay = self.policy.retry.delay_for(transient_failures);
                warn!(
                    attempt = transient_failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transfer failed, backing off"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            } else if matches!(error, SyncError::IntegrityMismatch { .. }) {
                integrity_failures += 1;
                if integrity_failures > self.policy.integrity_retries {
                    return Err(error);
                }
                warn!(error = %error, "Integrity check failed, re-fetching");
            } else {
                return Err(error);
            }
        }
    }

    async fn attempt_transfer(&self, record: &RemoteItemRecord) -> Result<Transfer> {
        let mut staging = self.content.create_staging().await?;

        if let Err(e) = self.stream_into(&record.remote_id, &mut staging).await {
            let path = staging.path().to_path_buf();
            drop(staging);
            self.content.discard(&path).await;
            return Err(e);
        }

        let staged = staging.finish().await?;
        match self.classify(record, &staged).await {
            Ok(Some(entry)) => {
                self.content.discard(&staged.path).await;
                Ok(Transfer::Known {
                    content_hash: staged.content_hash,
                    byte_size: staged.byte_size,
                    entry,
                })
            }
            Ok(None) => Ok(Transfer::Novel(staged)),
            Err(e) => {
                self.content.discard(&staged.path).await;
                Err(e)
            }
        }
    }

    /// Copy the remote stream into staging.
    ///
    /// A slow transfer may take as long as it needs while chunks keep
    /// arriving; only a silence longer than the request timeout fails it.
    async fn stream_into(&self, remote_id: &str, staging: &mut StagingFile) -> Result<()> {
        let limit = self.policy.request_timeout;
        let mut stream = timeout(limit, self.remote.fetch_bytes(remote_id))
            .await
            .map_err(|_| stalled(limit, "waiting for the response"))??;

        loop {
            let next = timeout(limit, stream.next())
                .await
                .map_err(|_| stalled(limit, "waiting for the next chunk"))?;
            match next {
                Some(chunk) => staging.write_chunk(&chunk?).await?,
                None => return Ok(()),
            }
        }
    }

    /// Check a fully staged download and look its digest up.
    ///
    /// Returns the existing entry for a known digest, `None` for new content.
    async fn classify(
        &self,
        record: &RemoteItemRecord,
        staged: &StagedContent,
    ) -> Result<Option<ContentEntry>> {
        if staged.byte_size != record.byte_size {
            return Err(SyncError::IntegrityMismatch {
                remote_id: record.remote_id.clone(),
                detail: format!(
                    "declared {} bytes, received {}",
                    record.byte_size, staged.byte_size
                ),
            });
        }

        if let Some(declared) = record.declared_md5.as_deref() {
            if !declared.eq_ignore_ascii_case(&staged.md5) {
                return Err(SyncError::IntegrityMismatch {
                    remote_id: record.remote_id.clone(),
                    detail: format!("declared md5 {}, received {}", declared, staged.md5),
                });
            }
        }

        if let Some(entry) = self.index.lookup(&staged.content_hash).await? {
            return Ok(Some(entry));
        }

        let (on_disk, _) = ContentStore::hash_file(&staged.path).await?;
        if on_disk != staged.content_hash {
            return Err(SyncError::IntegrityMismatch {
                remote_id: record.remote_id.clone(),
                detail: format!(
                    "streamed digest {} but staged file hashes to {}",
                    staged.content_hash, on_disk
                ),
            });
        }

        Ok(None)
    }

    async fn commit(
        &self,
        record: &RemoteItemRecord,
        transfer: Transfer,
    ) -> Result<(CommitOutcome, u64)> {
        match transfer {
            Transfer::Known {
                content_hash,
                byte_size,
                entry,
            } => {
                let commit = self
                    .index
                    .register(
                        &record.remote_id,
                        &content_hash,
                        &entry.canonical_local_path,
                        byte_size,
                    )
                    .await?;
                Ok((commit, byte_size))
            }
            Transfer::Novel(staged) => {
                let extension = extension_for(&record.display_name, record.content_type.as_deref());
                let relative = match self.content.promote(&staged, &extension).await {
                    Ok(relative) => relative,
                    Err(e) => {
                        self.content.discard(&staged.path).await;
                        return Err(e.into());
                    }
                };

                let commit = self
                    .index
                    .register(
                        &record.remote_id,
                        &staged.content_hash,
                        &relative,
                        staged.byte_size,
                    )
                    .await?;

                // Another worker committed the same digest first under a
                // different extension.
                if !commit.canonical && commit.entry.canonical_local_path != relative {
                    self.content.remove_redundant(&relative).await;
                }
                Ok((commit, staged.byte_size))
            }
        }
    }
}

fn stalled(limit: Duration, phase: &str) -> SyncError {
    SyncError::TransientIo(format!("no data for {}s {}", limit.as_secs(), phase))
}

fn absorb(
    joined: std::result::Result<ItemOutcome, JoinError>,
    report: &mut DownloadReport,
    fatal: &mut Option<SyncError>,
    cancel: &CancellationToken,
) {
    let outcome = match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            fatal.get_or_insert(SyncError::Internal(e.to_string()));
            cancel.cancel();
            return;
        }
    };

    match outcome {
        ItemOutcome::Captured { commit, downloaded } => {
            report.attempted += 1;
            report.bytes_downloaded += downloaded;
            if commit.canonical {
                report.verified += 1;
            } else {
                report.duplicates += 1;
                report.bytes_deduplicated += commit.entry.byte_size;
            }
        }
        ItemOutcome::NotClaimed => report.skipped += 1,
        ItemOutcome::Failed(item) => {
            report.attempted += 1;
            report.failed.push(item);
        }
        ItemOutcome::Released { remote_id, error } => {
            report.attempted += 1;
            if error.is_fatal() {
                warn!(remote_id = %remote_id, error = %error, "Fatal error, stopping new claims");
                fatal.get_or_insert(error);
                cancel.cancel();
            }
        }
    }
}
