//! Operation reports and exit tiers.

use crate::content_store::DiskUsage;
use crate::job::{SyncRun, SyncRunId};
use chrono::{TimeZone, Utc};
use core_manifest::{ContentSummary, StateCounts};
use core_runtime::EnumerationMode;
use serde::Serialize;
use std::fmt;

/// Three-tier outcome every operation ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    CompletedCleanly,
    /// Finished, but some items failed and will be retried later
    CompletedWithFailures,
    /// Aborted; nothing further was attempted
    Fatal,
}

impl RunOutcome {
    /// Process exit code for front ends: 0, 1 or 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::CompletedCleanly => 0,
            RunOutcome::CompletedWithFailures => 1,
            RunOutcome::Fatal => 2,
        }
    }

    fn from_failures(failures: bool) -> Self {
        if failures {
            RunOutcome::CompletedWithFailures
        } else {
            RunOutcome::CompletedCleanly
        }
    }
}

/// An item that ended in `Failed`, with its diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedItem {
    pub remote_id: String,
    pub reason: String,
}

// ============================================================================
// Enumerate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnumerationReport {
    pub run_id: SyncRunId,
    pub mode: EnumerationMode,
    pub items_seen: u64,
    pub items_new: u64,
    pub items_changed: u64,
    pub pages: u64,
    /// New checkpoint, set only when the pass covered the whole library
    pub checkpoint: Option<i64>,
    /// Why the pass ended early
    pub interrupted: Option<String>,
}

impl EnumerationReport {
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome::from_failures(self.interrupted.is_some())
    }
}

// ============================================================================
// Download
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    pub run_id: Option<SyncRunId>,
    /// `Downloading` records older than the liveness threshold put back
    pub requeued_stale: u64,
    /// `Failed` records past their cool-down put back
    pub requeued_failed: u64,
    /// `Discovered` records triaged into the queue
    pub promoted: u64,
    pub attempted: u64,
    pub verified: u64,
    pub duplicates: u64,
    pub failed: Vec<FailedItem>,
    /// Items another worker claimed first
    pub skipped: u64,
    pub bytes_downloaded: u64,
    pub bytes_deduplicated: u64,
}

impl DownloadReport {
    pub fn captured(&self) -> u64 {
        self.verified + self.duplicates
    }

    pub fn outcome(&self) -> RunOutcome {
        RunOutcome::from_failures(!self.failed.is_empty())
    }
}

// ============================================================================
// Verify
// ============================================================================

/// A verified item whose stored file no longer matches its digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashMismatch {
    pub remote_id: String,
    pub content_hash: String,
    pub local_path: String,
    /// Digest of the file on disk; `None` when the file is missing
    pub actual_hash: Option<String>,
}

/// Differences between the remote library and the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub run_id: SyncRunId,
    pub mode: EnumerationMode,
    pub items_checked: u64,
    /// Present remotely, unknown to the manifest; now recorded as `Discovered`
    pub new_items: Vec<String>,
    /// Known to the manifest but content not captured
    pub missing_locally: Vec<String>,
    pub hash_mismatches: Vec<HashMismatch>,
    pub interrupted: Option<String>,
}

impl DriftReport {
    pub fn has_drift(&self) -> bool {
        !self.new_items.is_empty()
            || !self.missing_locally.is_empty()
            || !self.hash_mismatches.is_empty()
    }

    /// Corrupt local files and early ends count as failures; new and
    /// missing items are ordinary backlog.
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome::from_failures(!self.hash_mismatches.is_empty() || self.interrupted.is_some())
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub counts: StateCounts,
    pub content: ContentSummary,
    /// Declared bytes of items not captured yet
    pub outstanding_bytes: u64,
    pub failed: Vec<FailedItem>,
    pub last_enumeration: Option<SyncRun>,
    pub disk: DiskUsage,
}

impl StatusReport {
    pub fn outcome(&self) -> RunOutcome {
        RunOutcome::from_failures(self.counts.failed > 0)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = &self.counts;
        writeln!(f, "Items:        {}", counts.total())?;
        writeln!(f, "  verified    {}", counts.verified)?;
        writeln!(f, "  duplicate   {}", counts.duplicate)?;
        writeln!(f, "  pending     {}", counts.discovered + counts.pending_download)?;
        writeln!(f, "  downloading {}", counts.downloading)?;
        writeln!(f, "  failed      {}", counts.failed)?;
        writeln!(
            f,
            "Content:      {} unique, {} stored, {} saved by dedup",
            self.content.unique_entries,
            format_size(self.content.stored_bytes),
            format_size(self.content.bytes_saved)
        )?;
        writeln!(f, "Outstanding:  {}", format_size(self.outstanding_bytes))?;
        writeln!(
            f,
            "Disk:         {} files, {}",
            self.disk.files,
            format_size(self.disk.bytes)
        )?;

        match &self.last_enumeration {
            Some(run) => {
                let started = Utc
                    .timestamp_opt(run.started_at, 0)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                    .unwrap_or_else(|| run.started_at.to_string());
                writeln!(
                    f,
                    "Last scan:    {} ({}, {} items seen)",
                    started, run.status, run.counts.items_seen
                )?;
            }
            None => writeln!(f, "Last scan:    never")?,
        }

        for item in &self.failed {
            writeln!(f, "  ! {}: {}", item.remote_id, item.reason)?;
        }
        Ok(())
    }
}

/// Human-readable byte count using binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::CompletedCleanly.exit_code(), 0);
        assert_eq!(RunOutcome::CompletedWithFailures.exit_code(), 1);
        assert_eq!(RunOutcome::Fatal.exit_code(), 2);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn test_download_outcome_reflects_failures() {
        let mut report = DownloadReport::default();
        assert_eq!(report.outcome(), RunOutcome::CompletedCleanly);

        report.failed.push(FailedItem {
            remote_id: "x".into(),
            reason: "gone".into(),
        });
        assert_eq!(report.outcome(), RunOutcome::CompletedWithFailures);
    }

    #[test]
    fn test_status_display_lists_failures() {
        let mut counts = StateCounts::default();
        counts.verified = 2;
        counts.failed = 1;
        let report = StatusReport {
            counts,
            content: ContentSummary::default(),
            outstanding_bytes: 2048,
            failed: vec![FailedItem {
                remote_id: "r9".into(),
                reason: "integrity mismatch".into(),
            }],
            last_enumeration: None,
            disk: DiskUsage::default(),
        };

        let text = report.to_string();
        assert!(text.contains("Outstanding:  2.0 KiB"));
        assert!(text.contains("Last scan:    never"));
        assert!(text.contains("r9: integrity mismatch"));
        assert_eq!(report.outcome(), RunOutcome::CompletedWithFailures);
    }
}
