//! # Sync Run Journal
//!
//! Every enumerate, download and verify operation is journaled as a
//! [`SyncRun`] so that progress and checkpoints survive restarts.
//!
//! ## State Machine
//!
//! ```text
//! Running → Completed
//!     ↓
//!   Failed
//! ```
//!
//! An enumeration run that completes a full remote pass records its start
//! time as the checkpoint for the next incremental pass. A run that ends
//! early never carries a checkpoint.

use crate::{Result, SyncError};
use core_runtime::EnumerationMode;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRunId(Uuid);

impl SyncRunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a run ID from its stored form
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidRunId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncRunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Kind and Status
// ============================================================================

/// Which engine operation a run journals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Enumerate,
    Download,
    Verify,
}

impl RunKind {
    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Enumerate => "enumerate",
            RunKind::Download => "download",
            RunKind::Verify => "verify",
        }
    }
}

impl FromStr for RunKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "enumerate" => Ok(RunKind::Enumerate),
            "download" => Ok(RunKind::Download),
            "verify" => Ok(RunKind::Verify),
            _ => Err(SyncError::InvalidStatus(format!("unknown run kind '{}'", s))),
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The current status of a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    /// Aborted by a fatal error
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Item counters journaled with a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Items looked at (enumerated, attempted or checked)
    pub items_seen: u64,
    /// Items new to the manifest or newly captured
    pub items_new: u64,
    pub items_failed: u64,
}

impl RunCounts {
    pub fn new(items_seen: u64, items_new: u64, items_failed: u64) -> Self {
        Self {
            items_seen,
            items_new,
            items_failed,
        }
    }
}

// ============================================================================
// Sync Run Entity
// ============================================================================

/// One journaled engine operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: SyncRunId,
    pub kind: RunKind,
    /// Enumeration mode, for runs that walk the remote library
    pub mode: Option<EnumerationMode>,
    pub status: RunStatus,
    pub counts: RunCounts,
    /// Remote modification time from which the next incremental pass starts
    pub checkpoint: Option<i64>,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub completed_at: Option<i64>,
}

impl SyncRun {
    /// Start a new run at `now`
    pub fn start(kind: RunKind, mode: Option<EnumerationMode>, now: i64) -> Self {
        Self {
            id: SyncRunId::new(),
            kind,
            mode,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            checkpoint: None,
            error_message: None,
            started_at: now,
            completed_at: None,
        }
    }

    /// Mark the run as completed
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not `Running`
    pub fn complete(mut self, counts: RunCounts, checkpoint: Option<i64>, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::Completed)?;
        self.status = RunStatus::Completed;
        self.counts = counts;
        self.checkpoint = checkpoint;
        self.completed_at = Some(now);
        Ok(self)
    }

    /// Mark the run as aborted
    ///
    /// # Errors
    ///
    /// Returns an error if the run is not `Running`
    pub fn fail(mut self, counts: RunCounts, error_message: String, now: i64) -> Result<Self> {
        self.validate_transition(RunStatus::Failed)?;
        self.status = RunStatus::Failed;
        self.counts = counts;
        self.checkpoint = None;
        self.error_message = Some(error_message);
        self.completed_at = Some(now);
        Ok(self)
    }

    /// Get the duration of the run in seconds
    pub fn duration_secs(&self) -> Option<u64> {
        self.completed_at
            .map(|end| end.saturating_sub(self.started_at).max(0) as u64)
    }

    fn validate_transition(&self, to: RunStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (RunStatus::Running, RunStatus::Completed) => true,
            (RunStatus::Running, RunStatus::Failed) => true,

            // Terminal states cannot transition
            (RunStatus::Completed, _) => false,
            (RunStatus::Failed, _) => false,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_round_trip() {
        let id = SyncRunId::new();
        let parsed = SyncRunId::from_string(&id.as_str()).unwrap();
        assert_eq!(id, parsed);
        assert!(SyncRunId::from_string("not-a-uuid").is_err());
    }

    #[test]
    fn test_kind_and_status_parse() {
        assert_eq!("ENUMERATE".parse::<RunKind>().unwrap(), RunKind::Enumerate);
        assert_eq!("verify".parse::<RunKind>().unwrap(), RunKind::Verify);
        assert!("sync".parse::<RunKind>().is_err());

        assert_eq!("failed".parse::<RunStatus>().unwrap(), RunStatus::Failed);
        assert!("cancelled".parse::<RunStatus>().is_err());
    }

    #[test]
    fn test_complete_records_checkpoint() {
        let run = SyncRun::start(RunKind::Enumerate, Some(EnumerationMode::Full), 1_000);
        let run = run
            .complete(RunCounts::new(10, 4, 0), Some(1_000), 1_060)
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.checkpoint, Some(1_000));
        assert_eq!(run.duration_secs(), Some(60));
    }

    #[test]
    fn test_failed_run_drops_checkpoint() {
        let mut run = SyncRun::start(RunKind::Enumerate, Some(EnumerationMode::Incremental), 5);
        run.checkpoint = Some(5);
        let run = run
            .fail(RunCounts::default(), "session expired".to_string(), 9)
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.checkpoint, None);
        assert_eq!(run.error_message.as_deref(), Some("session expired"));
    }

    #[test]
    fn test_terminal_runs_cannot_transition() {
        let run = SyncRun::start(RunKind::Download, None, 0)
            .complete(RunCounts::default(), None, 1)
            .unwrap();

        let result = run.clone().fail(RunCounts::default(), "late".to_string(), 2);
        assert!(matches!(
            result,
            Err(SyncError::InvalidStateTransition { .. })
        ));
        assert!(run.complete(RunCounts::default(), None, 3).is_err());
    }
}
