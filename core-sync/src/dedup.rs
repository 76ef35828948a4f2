//! # Deduplication Index
//!
//! Answers "is this digest already stored, and where?" without a database
//! round trip for every lookup. The manifest stays the source of truth: the
//! cache is rebuilt from it at startup and falls back to it on a miss, and
//! every registration goes through the manifest's commit transaction.

use crate::Result;
use core_manifest::{CommitOutcome, ContentEntry, ManifestStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

const REBUILD_PAGE_SIZE: u32 = 500;

pub struct DedupIndex {
    store: Arc<dyn ManifestStore>,
    entries: RwLock<HashMap<String, ContentEntry>>,
}

impl DedupIndex {
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Reload every content entry from the manifest.
    pub async fn rebuild(&self) -> Result<usize> {
        let mut loaded = HashMap::new();
        let mut after: Option<String> = None;

        loop {
            let page = self
                .store
                .list_content(after.as_deref(), REBUILD_PAGE_SIZE)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.content_hash.clone());
            let short_page = page.len() < REBUILD_PAGE_SIZE as usize;

            for entry in page {
                loaded.insert(entry.content_hash.clone(), entry);
            }
            if short_page {
                break;
            }
        }

        let count = loaded.len();
        *self.entries.write().await = loaded;
        info!(entries = count, "Deduplication index rebuilt");
        Ok(count)
    }

    /// Existing content entry for a digest, if any.
    pub async fn lookup(&self, content_hash: &str) -> Result<Option<ContentEntry>> {
        if let Some(entry) = self.entries.read().await.get(content_hash) {
            return Ok(Some(entry.clone()));
        }

        let entry = self.store.find_content(content_hash).await?;
        if let Some(entry) = &entry {
            self.entries
                .write()
                .await
                .insert(content_hash.to_string(), entry.clone());
        }
        Ok(entry)
    }

    /// Commit captured content for a claimed item.
    ///
    /// The first registration of a digest makes the item canonical with
    /// `local_path`; later ones record a duplicate of the existing entry.
    #[instrument(skip(self, local_path), fields(canonical = tracing::field::Empty))]
    pub async fn register(
        &self,
        remote_id: &str,
        content_hash: &str,
        local_path: &str,
        byte_size: u64,
    ) -> Result<CommitOutcome> {
        let outcome = self
            .store
            .commit_verified(remote_id, content_hash, local_path, byte_size)
            .await?;

        tracing::Span::current().record("canonical", outcome.canonical);
        debug!(
            reference_count = outcome.entry.reference_count,
            "Registered content"
        );

        self.entries
            .write()
            .await
            .insert(content_hash.to_string(), outcome.entry.clone());
        Ok(outcome)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::{ManualClock, RemoteItemDescriptor};
    use core_manifest::{create_test_pool, SqliteManifestStore, SyncState};

    async fn setup() -> (Arc<SqliteManifestStore>, DedupIndex) {
        let pool = create_test_pool().await.unwrap();
        let store = Arc::new(SqliteManifestStore::new(
            pool,
            Arc::new(ManualClock::new(1_000)),
        ));
        let index = DedupIndex::new(store.clone());
        (store, index)
    }

    async fn claim(store: &SqliteManifestStore, id: &str) {
        store
            .upsert_discovered(&RemoteItemDescriptor::new(id, format!("{}.jpg", id), 1, 10))
            .await
            .unwrap();
        store.promote_discovered().await.unwrap();
        store.claim_for_download(id).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_register_then_lookup_hits_cache() {
        let (store, index) = setup().await;
        let hash = "ab".repeat(32);
        claim(&store, "a").await;

        assert!(index.lookup(&hash).await.unwrap().is_none());

        let outcome = index
            .register("a", &hash, "ab/abab.jpg", 10)
            .await
            .unwrap();
        assert!(outcome.canonical);
        assert_eq!(outcome.record.sync_state, SyncState::Verified);

        let entry = index.lookup(&hash).await.unwrap().unwrap();
        assert_eq!(entry.canonical_local_path, "ab/abab.jpg");
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_second_registration_is_duplicate() {
        let (store, index) = setup().await;
        let hash = "cd".repeat(32);
        claim(&store, "a").await;
        claim(&store, "b").await;

        index.register("a", &hash, "cd/x.jpg", 10).await.unwrap();
        let second = index.register("b", &hash, "cd/x.jpg", 10).await.unwrap();

        assert!(!second.canonical);
        assert_eq!(second.record.sync_state, SyncState::Duplicate);
        assert_eq!(second.entry.reference_count, 2);
    }

    #[tokio::test]
    async fn test_rebuild_loads_committed_entries() {
        let (store, _index) = setup().await;
        claim(&store, "a").await;
        claim(&store, "b").await;
        store
            .commit_verified("a", &"01".repeat(32), "01/a.jpg", 10)
            .await
            .unwrap();
        store
            .commit_verified("b", &"02".repeat(32), "02/b.jpg", 10)
            .await
            .unwrap();

        let fresh = DedupIndex::new(store.clone());
        assert!(fresh.is_empty().await);
        assert_eq!(fresh.rebuild().await.unwrap(), 2);
        assert!(fresh.lookup(&"02".repeat(32)).await.unwrap().is_some());
    }
}
