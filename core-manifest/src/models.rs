//! Manifest domain models.

use crate::{ManifestError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Sync State
// ============================================================================

/// Lifecycle state of a remote item.
///
/// ```text
/// Discovered → PendingDownload → Downloading → Verified | Duplicate
///                    ↑               ↓
///                    └──────────── Failed (after cool-down)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Discovered,
    PendingDownload,
    Downloading,
    Duplicate,
    Verified,
    Failed,
}

impl SyncState {
    pub const ALL: [SyncState; 6] = [
        SyncState::Discovered,
        SyncState::PendingDownload,
        SyncState::Downloading,
        SyncState::Duplicate,
        SyncState::Verified,
        SyncState::Failed,
    ];

    /// Get the string representation for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Discovered => "discovered",
            SyncState::PendingDownload => "pending_download",
            SyncState::Downloading => "downloading",
            SyncState::Duplicate => "duplicate",
            SyncState::Verified => "verified",
            SyncState::Failed => "failed",
        }
    }

    /// Whether the item's bytes are accounted for in content storage.
    pub fn is_captured(&self) -> bool {
        matches!(self, SyncState::Duplicate | SyncState::Verified)
    }
}

impl FromStr for SyncState {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self> {
        SyncState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| ManifestError::Corrupt(format!("unknown sync_state '{}'", s)))
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// One remote item ever observed.
///
/// `content_hash` is set exactly when the state is `Duplicate` or `Verified`;
/// `local_path` only on the canonical `Verified` owner of a hash; `last_error`
/// only while `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItemRecord {
    pub remote_id: String,
    pub display_name: String,
    pub content_type: Option<String>,
    pub remote_modified_at: i64,
    /// Size declared by the remote before download
    pub byte_size: u64,
    /// MD5 declared by the remote, lowercase hex
    pub declared_md5: Option<String>,
    pub content_hash: Option<String>,
    pub sync_state: SyncState,
    /// Path relative to the storage root
    pub local_path: Option<String>,
    pub last_error: Option<String>,
    pub first_seen_at: i64,
    pub last_checked_at: i64,
    /// When `sync_state` last changed; drives liveness and cool-down checks
    pub state_changed_at: i64,
}

/// One unique content hash in content-addressed storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEntry {
    pub content_hash: String,
    /// Path relative to the storage root
    pub canonical_local_path: String,
    /// Number of remote items sharing this content
    pub reference_count: u64,
    pub byte_size: u64,
    pub committed_at: i64,
}

impl ContentEntry {
    /// Bytes not stored thanks to deduplication.
    pub fn bytes_saved(&self) -> u64 {
        self.reference_count.saturating_sub(1) * self.byte_size
    }
}

// ============================================================================
// Operation Results
// ============================================================================

/// What an upsert did to the stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertChange {
    /// First observation, created as `Discovered`
    Inserted,
    /// Known item, metadata unchanged; only `last_checked_at` moved
    Refreshed,
    /// Known item whose name, size, type, declared digest or modification
    /// time changed
    MetadataChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub record: RemoteItemRecord,
    pub change: UpsertChange,
}

/// Result of committing downloaded content for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub record: RemoteItemRecord,
    pub entry: ContentEntry,
    /// `true` when this item became the canonical owner of the hash
    pub canonical: bool,
}

/// Record counts per sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub discovered: u64,
    pub pending_download: u64,
    pub downloading: u64,
    pub duplicate: u64,
    pub verified: u64,
    pub failed: u64,
}

impl StateCounts {
    pub fn get(&self, state: SyncState) -> u64 {
        match state {
            SyncState::Discovered => self.discovered,
            SyncState::PendingDownload => self.pending_download,
            SyncState::Downloading => self.downloading,
            SyncState::Duplicate => self.duplicate,
            SyncState::Verified => self.verified,
            SyncState::Failed => self.failed,
        }
    }

    pub(crate) fn set(&mut self, state: SyncState, count: u64) {
        let slot = match state {
            SyncState::Discovered => &mut self.discovered,
            SyncState::PendingDownload => &mut self.pending_download,
            SyncState::Downloading => &mut self.downloading,
            SyncState::Duplicate => &mut self.duplicate,
            SyncState::Verified => &mut self.verified,
            SyncState::Failed => &mut self.failed,
        };
        *slot = count;
    }

    pub fn total(&self) -> u64 {
        SyncState::ALL.iter().map(|s| self.get(*s)).sum()
    }

    /// Items whose content is not yet captured.
    pub fn outstanding(&self) -> u64 {
        self.discovered + self.pending_download + self.downloading + self.failed
    }
}

/// Aggregates over the content table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub unique_entries: u64,
    /// Bytes physically stored (one copy per hash)
    pub stored_bytes: u64,
    /// Sum over entries of `(reference_count - 1) * byte_size`
    pub bytes_saved: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_round_trips_through_storage_names() {
        for state in SyncState::ALL {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!(matches!(
            "archived".parse::<SyncState>(),
            Err(ManifestError::Corrupt(_))
        ));
    }

    #[test]
    fn test_captured_states() {
        assert!(SyncState::Verified.is_captured());
        assert!(SyncState::Duplicate.is_captured());
        assert!(!SyncState::Downloading.is_captured());
        assert!(!SyncState::Failed.is_captured());
    }

    #[test]
    fn test_state_counts_totals() {
        let mut counts = StateCounts::default();
        counts.set(SyncState::Verified, 4);
        counts.set(SyncState::Duplicate, 2);
        counts.set(SyncState::Failed, 1);
        counts.set(SyncState::PendingDownload, 3);

        assert_eq!(counts.total(), 10);
        assert_eq!(counts.outstanding(), 4);
        assert_eq!(counts.get(SyncState::Duplicate), 2);
    }

    #[test]
    fn test_bytes_saved() {
        let entry = ContentEntry {
            content_hash: "ab".repeat(32),
            canonical_local_path: "ab/x.jpg".to_string(),
            reference_count: 3,
            byte_size: 100,
            committed_at: 0,
        };
        assert_eq!(entry.bytes_saved(), 200);
    }
}
