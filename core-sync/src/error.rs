use bridge_traits::error::BridgeError;
use core_manifest::ManifestError;
use thiserror::Error;

use crate::report::RunOutcome;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transient I/O failure: {0}")]
    TransientIo(String),

    #[error("Remote session expired, re-authenticate and rerun: {0}")]
    AuthExpired(String),

    #[error("Integrity mismatch for {remote_id}: {detail}")]
    IntegrityMismatch { remote_id: String, detail: String },

    #[error("Local file for {content_hash} is corrupt: {detail}")]
    CorruptLocalFile { content_hash: String, detail: String },

    #[error("Manifest store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Remote item not found: {remote_id}")]
    NotFound { remote_id: String },

    #[error("Claim on {remote_id} was lost to another worker")]
    ClaimLost { remote_id: String },

    #[error("Remote operation failed: {0}")]
    Remote(String),

    #[error("Local storage error: {0}")]
    LocalStorage(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid run ID: {0}")]
    InvalidRunId(String),

    #[error("Invalid run status: {0}")]
    InvalidStatus(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Sync run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Worker task failed: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Failures that abort the whole operation instead of a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::AuthExpired(_)
                | SyncError::StoreUnavailable(_)
                | SyncError::Config(_)
                | SyncError::Internal(_)
        )
    }

    /// Failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientIo(_))
    }

    /// Exit tier for an operation that ended with this error.
    pub fn outcome(&self) -> RunOutcome {
        if self.is_fatal() {
            RunOutcome::Fatal
        } else {
            RunOutcome::CompletedWithFailures
        }
    }
}

impl From<ManifestError> for SyncError {
    fn from(error: ManifestError) -> Self {
        match error {
            ManifestError::InvalidTransition { remote_id, .. } => SyncError::ClaimLost { remote_id },
            ManifestError::NotFound { remote_id } => SyncError::NotFound { remote_id },
            other => SyncError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<BridgeError> for SyncError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::NotFound { remote_id } => SyncError::NotFound { remote_id },
            BridgeError::Transient(message) => SyncError::TransientIo(message),
            BridgeError::Io(e) => SyncError::TransientIo(e.to_string()),
            BridgeError::AuthExpired(message) => SyncError::AuthExpired(message),
            BridgeError::OperationFailed(message) => SyncError::Remote(message),
        }
    }
}

impl From<core_runtime::Error> for SyncError {
    fn from(error: core_runtime::Error) -> Self {
        SyncError::Config(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
