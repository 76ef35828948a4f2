//! # Sync Engine
//!
//! Backs a remote media library up into local content-addressed storage.
//!
//! ## Overview
//!
//! The engine keeps a manifest of every remote item it has observed and moves
//! each one through a small lifecycle until its bytes are captured locally:
//! - Enumerating the remote library, fully or since the last checkpoint
//! - Downloading pending items with a bounded worker pool
//! - Storing each unique digest once and counting duplicates against it
//! - Reporting drift between the remote, the manifest and the files on disk
//!
//! ## Components
//!
//! - **Content Store** (`content_store`): staging, hashing and sharded content paths
//! - **Deduplication Index** (`dedup`): digest lookups and first-writer-wins registration
//! - **Remote Enumerator** (`enumerator`): lazy paginated listing with retries
//! - **Download Orchestrator** (`orchestrator`): claim → fetch → hash → commit workers
//! - **Drift Detector** (`drift`): verification against remote and local state
//! - **Run Journal** (`job`, `repository`): persisted runs and checkpoints
//! - **Sync Controller** (`controller`): the four operations front ends call

pub mod content_store;
pub mod controller;
pub mod dedup;
pub mod drift;
pub mod enumerator;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod report;
pub mod repository;

pub use content_store::{extension_for, ContentHasher, ContentStore, DiskUsage, StagedContent};
pub use controller::SyncController;
pub use dedup::DedupIndex;
pub use drift::{DriftDetector, DriftFindings};
pub use enumerator::{RemoteEnumerator, RemoteScan, ScanStats};
pub use error::{Result, SyncError};
pub use job::{RunCounts, RunKind, RunStatus, SyncRun, SyncRunId};
pub use orchestrator::{
    AbortedPass, DownloadOptions, DownloadOrchestrator, Reconciliation, TransferPolicy,
};
pub use report::{
    format_size, DownloadReport, DriftReport, EnumerationReport, FailedItem, HashMismatch,
    RunOutcome, StatusReport,
};
pub use repository::{SqliteSyncRunRepository, SyncRunRepository};
