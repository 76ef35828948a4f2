//! # Drift Detection
//!
//! Compares a fresh remote enumeration against the manifest and the files on
//! disk:
//!
//! - remote items the manifest has never seen are recorded as `Discovered`
//!   and reported as new
//! - known items whose content is not captured are reported as missing
//! - canonical `Verified` files are re-hashed; a missing or altered file is
//!   reported as a hash mismatch
//!
//! `Duplicate` records share the canonical owner's file and are not re-hashed.
//! Items that disappeared remotely are not reported.

use crate::content_store::ContentStore;
use crate::enumerator::RemoteScan;
use crate::report::HashMismatch;
use crate::{Result, SyncError};
use bridge_traits::RemoteItemDescriptor;
use core_manifest::{ManifestStore, RemoteItemRecord, SyncState};
use std::io;
use std::sync::Arc;
use tracing::{debug, warn};

/// Accumulated differences of one verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftFindings {
    pub items_checked: u64,
    pub new_items: Vec<String>,
    pub missing_locally: Vec<String>,
    pub hash_mismatches: Vec<HashMismatch>,
}

pub struct DriftDetector {
    store: Arc<dyn ManifestStore>,
    content: Arc<ContentStore>,
}

impl DriftDetector {
    pub fn new(store: Arc<dyn ManifestStore>, content: Arc<ContentStore>) -> Self {
        Self { store, content }
    }

    /// Drain `scan`, classifying every item.
    ///
    /// Findings gathered before an error are kept in `findings`, so a caller
    /// can still report a pass that ended early.
    pub async fn detect(&self, scan: &mut RemoteScan<'_>, findings: &mut DriftFindings) -> Result<()> {
        while let Some(item) = scan.next_item().await? {
            findings.items_checked += 1;
            self.check_item(&item, findings).await?;
        }
        Ok(())
    }

    async fn check_item(
        &self,
        item: &RemoteItemDescriptor,
        findings: &mut DriftFindings,
    ) -> Result<()> {
        let Some(record) = self.store.find(&item.remote_id).await? else {
            self.store.upsert_discovered(item).await?;
            debug!(remote_id = %item.remote_id, "New remote item");
            findings.new_items.push(item.remote_id.clone());
            return Ok(());
        };

        match record.sync_state {
            SyncState::Verified => {
                if let Some(mismatch) = self.check_local_file(&record).await? {
                    let error = SyncError::CorruptLocalFile {
                        content_hash: mismatch.content_hash.clone(),
                        detail: match &mismatch.actual_hash {
                            Some(actual) => format!("file hashes to {}", actual),
                            None => "file is missing or unreadable".to_string(),
                        },
                    };
                    warn!(
                        remote_id = %mismatch.remote_id,
                        path = %mismatch.local_path,
                        error = %error,
                        "Drift detected"
                    );
                    findings.hash_mismatches.push(mismatch);
                }
            }
            SyncState::Duplicate => {}
            _ => findings.missing_locally.push(record.remote_id),
        }

        Ok(())
    }

    async fn check_local_file(&self, record: &RemoteItemRecord) -> Result<Option<HashMismatch>> {
        let (Some(content_hash), Some(local_path)) = (&record.content_hash, &record.local_path)
        else {
            return Err(SyncError::StoreUnavailable(format!(
                "verified record {} has no content hash or path",
                record.remote_id
            )));
        };

        let actual_hash = match ContentStore::hash_file(&self.content.resolve(local_path)).await {
            Ok((digest, _)) if &digest == content_hash => return Ok(None),
            Ok((digest, _)) => Some(digest),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                debug!(path = %local_path, error = %e, "Cannot read stored content");
                None
            }
        };

        Ok(Some(HashMismatch {
            remote_id: record.remote_id.clone(),
            content_hash: content_hash.clone(),
            local_path: local_path.clone(),
            actual_hash,
        }))
    }
}
