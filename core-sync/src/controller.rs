//! # Sync Controller
//!
//! Entry point for the four engine operations:
//!
//! | Operation   | Effect                                                     |
//! |-------------|------------------------------------------------------------|
//! | `enumerate` | record remote items as `Discovered`, advance checkpoint    |
//! | `download`  | requeue and triage, then drain `PendingDownload`           |
//! | `verify`    | report drift between remote, manifest and local files      |
//! | `status`    | read-only summary of the manifest and content storage      |
//!
//! Operations are independent and idempotent; each relies only on manifest
//! state already present. Enumerate, download and verify are journaled as
//! sync runs and never overlap on one controller. The remote session is
//! not shared between listing passes.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::{EnumerationMode, VaultConfig};
//! use core_sync::{DownloadOptions, SyncController};
//!
//! let controller = SyncController::open(config.clone(), remote).await?;
//! controller.enumerate(EnumerationMode::Incremental).await?;
//! let report = controller.download(DownloadOptions::from_config(&config)).await?;
//! std::process::exit(report.outcome().exit_code());
//! ```

use crate::content_store::ContentStore;
use crate::dedup::DedupIndex;
use crate::drift::{DriftDetector, DriftFindings};
use crate::enumerator::{RemoteEnumerator, RemoteScan};
use crate::job::{RunCounts, RunKind, SyncRun};
use crate::orchestrator::{AbortedPass, DownloadOptions, DownloadOrchestrator, TransferPolicy};
use crate::report::{DownloadReport, DriftReport, EnumerationReport, FailedItem, StatusReport};
use crate::repository::{SqliteSyncRunRepository, SyncRunRepository};
use crate::{Result, SyncError};
use bridge_traits::{Clock, RemoteLibrary, SystemClock};
use core_manifest::{
    create_pool, DatabaseConfig, ManifestStore, SqliteManifestStore, StatePager, SyncState,
    UpsertChange,
};
use core_runtime::config::MAX_CONCURRENCY;
use core_runtime::{EnumerationMode, VaultConfig};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

const FAILED_PAGE_SIZE: u32 = 500;

/// Counters gathered while ingesting an enumeration pass.
#[derive(Debug, Default)]
struct IngestTally {
    seen: u64,
    new: u64,
    changed: u64,
}

pub struct SyncController {
    config: VaultConfig,
    store: Arc<dyn ManifestStore>,
    runs: Arc<dyn SyncRunRepository>,
    index: Arc<DedupIndex>,
    content: Arc<ContentStore>,
    enumerator: RemoteEnumerator,
    orchestrator: DownloadOrchestrator,
    drift: DriftDetector,
    clock: Arc<dyn Clock>,
    operation_lock: Mutex<()>,
}

impl SyncController {
    /// Open the manifest database and content storage named by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for invalid configuration and
    /// [`SyncError::StoreUnavailable`] when the database cannot be opened.
    pub async fn open(config: VaultConfig, remote: Arc<dyn RemoteLibrary>) -> Result<Self> {
        config.validate()?;

        let database = DatabaseConfig::new(&config.database_path)
            .max_connections(config.database_max_connections);
        let pool = create_pool(database).await?;

        Self::with_pool(config, pool, remote, Arc::new(SystemClock)).await
    }

    /// Build on an existing pool with migrations applied.
    pub async fn with_pool(
        config: VaultConfig,
        pool: SqlitePool,
        remote: Arc<dyn RemoteLibrary>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store: Arc<dyn ManifestStore> =
            Arc::new(SqliteManifestStore::new(pool.clone(), clock.clone()));
        let runs: Arc<dyn SyncRunRepository> = Arc::new(SqliteSyncRunRepository::new(pool));

        Self::with_components(config, store, runs, remote, clock).await
    }

    /// Build from explicit collaborators.
    ///
    /// Clears leftover staging files and loads the deduplication index.
    pub async fn with_components(
        config: VaultConfig,
        store: Arc<dyn ManifestStore>,
        runs: Arc<dyn SyncRunRepository>,
        remote: Arc<dyn RemoteLibrary>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let content = Arc::new(ContentStore::open(&config.storage_root).await?);
        let cleared = content.clear_staging().await?;
        if cleared > 0 {
            info!(cleared, "Removed staging files left by an interrupted run");
        }

        let index = Arc::new(DedupIndex::new(store.clone()));
        index.rebuild().await?;

        let enumerator = RemoteEnumerator::new(remote.clone(), runs.clone(), clock.clone(), &config);
        let orchestrator = DownloadOrchestrator::new(
            store.clone(),
            index.clone(),
            content.clone(),
            remote,
            clock.clone(),
            TransferPolicy::from_config(&config),
        );
        let drift = DriftDetector::new(store.clone(), content.clone());

        Ok(Self {
            config,
            store,
            runs,
            index,
            content,
            enumerator,
            orchestrator,
            drift,
            clock,
            operation_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ManifestStore> {
        self.store.clone()
    }

    pub fn index(&self) -> Arc<DedupIndex> {
        self.index.clone()
    }

    // ========================================================================
    // Enumerate
    // ========================================================================

    /// Record every remote item of this pass in the manifest.
    ///
    /// A pass that covers the whole library stores its start time as the new
    /// checkpoint. A pass cut short by a non-fatal page failure is reported
    /// as interrupted and leaves the previous checkpoint in effect.
    ///
    /// # Errors
    ///
    /// Fatal errors (expired session, unavailable manifest) are returned.
    #[instrument(skip(self))]
    pub async fn enumerate(&self, mode: EnumerationMode) -> Result<EnumerationReport> {
        let _guard = self.operation_lock.lock().await;
        let run = self.start_run(RunKind::Enumerate, Some(mode)).await?;

        let mut scan = match self.enumerator.enumerate(mode).await {
            Ok(scan) => scan,
            Err(e) => return Err(self.abort_run(run, RunCounts::default(), e).await),
        };

        let mut tally = IngestTally::default();
        let walk = self.ingest(&mut scan, &mut tally).await;
        let counts = RunCounts::new(tally.seen, tally.new, 0);

        let interrupted = match walk {
            Ok(()) => None,
            Err(e) if e.is_fatal() => return Err(self.abort_run(run, counts, e).await),
            Err(e) => Some(e),
        };

        let mut report = EnumerationReport {
            run_id: run.id,
            mode,
            items_seen: tally.seen,
            items_new: tally.new,
            items_changed: tally.changed,
            pages: scan.stats().pages,
            checkpoint: None,
            interrupted: interrupted.as_ref().map(ToString::to_string),
        };

        match interrupted {
            Some(e) => {
                warn!(error = %e, seen = tally.seen, "Enumeration interrupted, checkpoint unchanged");
                self.close_failed(run, counts, &e).await?;
            }
            None => {
                let checkpoint = scan.is_complete().then(|| scan.started_at());
                report.checkpoint = checkpoint;
                let run = run.complete(counts, checkpoint, self.clock.unix_timestamp())?;
                self.runs.update(&run).await?;
                info!(
                    seen = tally.seen,
                    new = tally.new,
                    changed = tally.changed,
                    checkpoint = ?checkpoint,
                    "Enumeration completed"
                );
            }
        }

        Ok(report)
    }

    async fn ingest(&self, scan: &mut RemoteScan<'_>, tally: &mut IngestTally) -> Result<()> {
        while let Some(item) = scan.next_item().await? {
            tally.seen += 1;
            match self.store.upsert_discovered(&item).await?.change {
                UpsertChange::Inserted => tally.new += 1,
                UpsertChange::MetadataChanged => tally.changed += 1,
                UpsertChange::Refreshed => {}
            }
        }
        Ok(())
    }

    // ========================================================================
    // Download
    // ========================================================================

    /// Requeue, triage and download every pending item.
    ///
    /// # Errors
    ///
    /// Invalid options and fatal errors are returned; per-item failures are
    /// listed in the report. A fatal error carries the report of the work
    /// done before it, which is also journaled with the failed run.
    #[instrument(skip(self))]
    pub async fn download(
        &self,
        options: DownloadOptions,
    ) -> std::result::Result<DownloadReport, AbortedPass> {
        if options.concurrency_limit == 0 || options.concurrency_limit > MAX_CONCURRENCY {
            return Err(SyncError::Config(format!(
                "Concurrency limit must be between 1 and {}",
                MAX_CONCURRENCY
            ))
            .into());
        }

        let _guard = self.operation_lock.lock().await;
        let run = self.start_run(RunKind::Download, None).await?;

        match self.orchestrator.process_pending(&options).await {
            Ok(mut report) => {
                report.run_id = Some(run.id);
                let counts = download_counts(&report);
                let run = run.complete(counts, None, self.clock.unix_timestamp())?;
                self.runs.update(&run).await?;
                Ok(report)
            }
            Err(AbortedPass { error, mut report }) => {
                report.run_id = Some(run.id);
                let error = self.abort_run(run, download_counts(&report), error).await;
                Err(AbortedPass { error, report })
            }
        }
    }

    // ========================================================================
    // Verify
    // ========================================================================

    /// Compare a fresh enumeration with the manifest and local files.
    ///
    /// Uses the configured verify mode when `mode` is `None`. Only genuinely
    /// new items are written, as `Discovered`.
    #[instrument(skip(self))]
    pub async fn verify(&self, mode: Option<EnumerationMode>) -> Result<DriftReport> {
        let mode = mode.unwrap_or(self.config.verify_mode);
        let _guard = self.operation_lock.lock().await;
        let run = self.start_run(RunKind::Verify, Some(mode)).await?;

        let mut scan = match self.enumerator.enumerate(mode).await {
            Ok(scan) => scan,
            Err(e) => return Err(self.abort_run(run, RunCounts::default(), e).await),
        };

        let mut findings = DriftFindings::default();
        let detected = self.drift.detect(&mut scan, &mut findings).await;
        let counts = RunCounts::new(
            findings.items_checked,
            findings.new_items.len() as u64,
            findings.hash_mismatches.len() as u64,
        );

        let interrupted = match detected {
            Ok(()) => None,
            Err(e) if e.is_fatal() => return Err(self.abort_run(run, counts, e).await),
            Err(e) => Some(e),
        };

        let report = DriftReport {
            run_id: run.id,
            mode,
            items_checked: findings.items_checked,
            new_items: findings.new_items,
            missing_locally: findings.missing_locally,
            hash_mismatches: findings.hash_mismatches,
            interrupted: interrupted.as_ref().map(ToString::to_string),
        };

        match interrupted {
            Some(e) => self.close_failed(run, counts, &e).await?,
            None => {
                let run = run.complete(counts, None, self.clock.unix_timestamp())?;
                self.runs.update(&run).await?;
            }
        }

        info!(
            checked = report.items_checked,
            new = report.new_items.len(),
            missing = report.missing_locally.len(),
            mismatches = report.hash_mismatches.len(),
            "Verification finished"
        );
        Ok(report)
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Read-only summary of the manifest and content storage.
    pub async fn status(&self) -> Result<StatusReport> {
        let counts = self.store.state_counts().await?;
        let content = self.store.content_summary().await?;
        let outstanding_bytes = self.store.outstanding_bytes().await?;
        let last_enumeration = self.runs.latest(RunKind::Enumerate).await?;
        let disk = self.content.disk_usage().await?;

        let mut failed = Vec::new();
        let mut pager = StatePager::new(self.store.as_ref(), SyncState::Failed, FAILED_PAGE_SIZE);
        while let Some(page) = pager.next_page().await? {
            failed.extend(page.into_iter().map(|record| FailedItem {
                remote_id: record.remote_id,
                reason: record.last_error.unwrap_or_default(),
            }));
        }

        Ok(StatusReport {
            counts,
            content,
            outstanding_bytes,
            failed,
            last_enumeration,
            disk,
        })
    }

    /// Journaled runs, most recent first.
    pub async fn history(&self, limit: u32) -> Result<Vec<SyncRun>> {
        self.runs.history(limit).await
    }

    // ========================================================================
    // Run Journal
    // ========================================================================

    async fn start_run(&self, kind: RunKind, mode: Option<EnumerationMode>) -> Result<SyncRun> {
        let run = SyncRun::start(kind, mode, self.clock.unix_timestamp());
        self.runs.insert(&run).await?;
        Ok(run)
    }

    async fn close_failed(&self, run: SyncRun, counts: RunCounts, error: &SyncError) -> Result<()> {
        let run = run.fail(counts, error.to_string(), self.clock.unix_timestamp())?;
        self.runs.update(&run).await
    }

    /// Journal a fatal error and hand it back to the caller.
    async fn abort_run(&self, run: SyncRun, counts: RunCounts, error: SyncError) -> SyncError {
        error!(kind = %run.kind, error = %error, "Operation aborted");
        if let Err(journal_error) = self.close_failed(run, counts, &error).await {
            warn!(error = %journal_error, "Failed to journal aborted run");
        }
        error
    }
}

fn download_counts(report: &DownloadReport) -> RunCounts {
    RunCounts::new(
        report.attempted,
        report.captured(),
        report.failed.len() as u64,
    )
}
