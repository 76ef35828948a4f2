//! # Manifest Store
//!
//! Durable record of every remote item observed and of every unique content
//! hash captured, with transactional state transitions.
//!
//! ## Concurrency
//!
//! The claim and commit operations are the only state shared by download
//! workers. Both are single write statements or write-first transactions,
//! so SQLite takes the write lock before reading anything and concurrent
//! callers serialize on it:
//!
//! - `claim_for_download` is one conditional `UPDATE … RETURNING`; exactly one
//!   caller sees the `pending_download` row.
//! - `commit_verified` starts with the `content_entries` upsert. The returned
//!   `reference_count` decides whether the caller became the canonical owner
//!   (`1`) or recorded a duplicate (`> 1`).

use crate::models::{
    CommitOutcome, ContentEntry, ContentSummary, RemoteItemRecord, StateCounts, SyncState,
    UpsertChange, UpsertOutcome,
};
use crate::{ManifestError, Result};
use async_trait::async_trait;
use bridge_traits::remote::RemoteItemDescriptor;
use bridge_traits::time::Clock;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, instrument};

macro_rules! item_columns {
    () => {
        "remote_id, display_name, content_type, remote_modified_at, byte_size, \
         declared_md5, content_hash, sync_state, local_path, last_error, first_seen_at, \
         last_checked_at, state_changed_at"
    };
}

macro_rules! content_columns {
    () => {
        "content_hash, canonical_local_path, reference_count, byte_size, committed_at"
    };
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence contract for the manifest.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Record an observation of a remote item.
    ///
    /// New items are created as `Discovered`. Known items keep their sync
    /// state; unchanged metadata only refreshes `last_checked_at`.
    async fn upsert_discovered(&self, item: &RemoteItemDescriptor) -> Result<UpsertOutcome>;

    /// Triage: move every `Discovered` record to `PendingDownload`.
    async fn promote_discovered(&self) -> Result<u64>;

    /// Atomically move `PendingDownload → Downloading`.
    ///
    /// Returns `None` when the record is not pending, including when another
    /// worker claimed it first.
    async fn claim_for_download(&self, remote_id: &str) -> Result<Option<RemoteItemRecord>>;

    /// Record captured content for a claimed item in one transaction.
    ///
    /// Creates the content entry for a new hash (the item becomes `Verified`
    /// and owns `local_path`), or increments the existing entry's reference
    /// count (the item becomes `Duplicate` with no local path).
    ///
    /// # Errors
    ///
    /// [`ManifestError::InvalidTransition`] if the item is not `Downloading`;
    /// nothing is written in that case.
    async fn commit_verified(
        &self,
        remote_id: &str,
        content_hash: &str,
        local_path: &str,
        byte_size: u64,
    ) -> Result<CommitOutcome>;

    /// Move a claimed item to `Failed` with a diagnostic.
    async fn mark_failed(&self, remote_id: &str, reason: &str) -> Result<()>;

    /// Return a claimed item to `PendingDownload` without recording a failure.
    async fn release_claim(&self, remote_id: &str) -> Result<bool>;

    /// Requeue `Downloading` records claimed at or before `claimed_before`.
    async fn requeue_stale_claims(&self, claimed_before: i64) -> Result<u64>;

    /// Requeue `Failed` records that failed at or before `failed_before`.
    async fn requeue_failed(&self, failed_before: i64) -> Result<u64>;

    /// One keyset page of records in `state`, ordered by `remote_id`.
    async fn list_by_state(
        &self,
        state: SyncState,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<RemoteItemRecord>>;

    async fn find(&self, remote_id: &str) -> Result<Option<RemoteItemRecord>>;

    async fn find_content(&self, content_hash: &str) -> Result<Option<ContentEntry>>;

    /// One keyset page of content entries, ordered by hash.
    async fn list_content(&self, after: Option<&str>, limit: u32) -> Result<Vec<ContentEntry>>;

    async fn state_counts(&self) -> Result<StateCounts>;

    async fn content_summary(&self) -> Result<ContentSummary>;

    /// Declared bytes of items whose content is not captured yet.
    async fn outstanding_bytes(&self) -> Result<u64>;
}

// ============================================================================
// Lazy Listing
// ============================================================================

/// Walks all records in one state page by page.
///
/// Holds only the last seen `remote_id`, so a pager can be dropped and a new
/// one resumed from [`StatePager::position`] later.
pub struct StatePager<'a> {
    store: &'a dyn ManifestStore,
    state: SyncState,
    page_size: u32,
    after: Option<String>,
    exhausted: bool,
}

impl<'a> StatePager<'a> {
    pub fn new(store: &'a dyn ManifestStore, state: SyncState, page_size: u32) -> Self {
        Self {
            store,
            state,
            page_size: page_size.max(1),
            after: None,
            exhausted: false,
        }
    }

    pub fn resume_after(mut self, remote_id: impl Into<String>) -> Self {
        self.after = Some(remote_id.into());
        self
    }

    pub fn position(&self) -> Option<&str> {
        self.after.as_deref()
    }

    /// Next page, or `None` once every record has been returned.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RemoteItemRecord>>> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .store
            .list_by_state(self.state, self.after.as_deref(), self.page_size)
            .await?;

        if (page.len() as u32) < self.page_size {
            self.exhausted = true;
        }

        match page.last() {
            Some(last) => self.after = Some(last.remote_id.clone()),
            None => return Ok(None),
        }

        Ok(Some(page))
    }
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of [`ManifestStore`]
pub struct SqliteManifestStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteManifestStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    async fn fetch_item(&self, remote_id: &str) -> Result<Option<RemoteItemRecord>> {
        let row = sqlx::query_as::<_, RemoteItemRow>(concat!(
            "SELECT ",
            item_columns!(),
            " FROM remote_items WHERE remote_id = ?"
        ))
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RemoteItemRecord::try_from).transpose()
    }
}

#[derive(Debug, FromRow)]
struct RemoteItemRow {
    remote_id: String,
    display_name: String,
    content_type: Option<String>,
    remote_modified_at: i64,
    byte_size: i64,
    declared_md5: Option<String>,
    content_hash: Option<String>,
    sync_state: String,
    local_path: Option<String>,
    last_error: Option<String>,
    first_seen_at: i64,
    last_checked_at: i64,
    state_changed_at: i64,
}

impl TryFrom<RemoteItemRow> for RemoteItemRecord {
    type Error = ManifestError;

    fn try_from(row: RemoteItemRow) -> Result<Self> {
        Ok(RemoteItemRecord {
            sync_state: row.sync_state.parse()?,
            byte_size: non_negative(row.byte_size, "remote_items.byte_size")?,
            remote_id: row.remote_id,
            display_name: row.display_name,
            content_type: row.content_type,
            remote_modified_at: row.remote_modified_at,
            declared_md5: row.declared_md5,
            content_hash: row.content_hash,
            local_path: row.local_path,
            last_error: row.last_error,
            first_seen_at: row.first_seen_at,
            last_checked_at: row.last_checked_at,
            state_changed_at: row.state_changed_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ContentEntryRow {
    content_hash: String,
    canonical_local_path: String,
    reference_count: i64,
    byte_size: i64,
    committed_at: i64,
}

impl TryFrom<ContentEntryRow> for ContentEntry {
    type Error = ManifestError;

    fn try_from(row: ContentEntryRow) -> Result<Self> {
        Ok(ContentEntry {
            reference_count: non_negative(row.reference_count, "reference_count")?,
            byte_size: non_negative(row.byte_size, "content_entries.byte_size")?,
            content_hash: row.content_hash,
            canonical_local_path: row.canonical_local_path,
            committed_at: row.committed_at,
        })
    }
}

fn non_negative(value: i64, column: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| ManifestError::Corrupt(format!("{column} is {value}")))
}

fn to_sql_size(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| ManifestError::Corrupt(format!("size {value} overflows")))
}

#[async_trait]
impl ManifestStore for SqliteManifestStore {
    #[instrument(skip(self, item), fields(remote_id = %item.remote_id))]
    async fn upsert_discovered(&self, item: &RemoteItemDescriptor) -> Result<UpsertOutcome> {
        let now = self.now();
        let byte_size = to_sql_size(item.byte_size)?;
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock from the start.
        let inserted = sqlx::query(
            r#"
            INSERT INTO remote_items (
                remote_id, display_name, content_type, remote_modified_at, byte_size,
                declared_md5, sync_state, first_seen_at, last_checked_at, state_changed_at
            ) VALUES (?, ?, ?, ?, ?, ?, 'discovered', ?, ?, ?)
            ON CONFLICT(remote_id) DO NOTHING
            "#,
        )
        .bind(&item.remote_id)
        .bind(&item.display_name)
        .bind(&item.content_type)
        .bind(item.modified_at)
        .bind(byte_size)
        .bind(&item.declared_md5)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        let change = if inserted {
            UpsertChange::Inserted
        } else {
            let changed = sqlx::query(
                r#"
                UPDATE remote_items SET
                    display_name = ?,
                    content_type = ?,
                    remote_modified_at = ?,
                    byte_size = ?,
                    declared_md5 = ?,
                    last_checked_at = ?
                WHERE remote_id = ?
                  AND (display_name IS NOT ?
                       OR content_type IS NOT ?
                       OR remote_modified_at IS NOT ?
                       OR byte_size IS NOT ?
                       OR declared_md5 IS NOT ?)
                "#,
            )
            .bind(&item.display_name)
            .bind(&item.content_type)
            .bind(item.modified_at)
            .bind(byte_size)
            .bind(&item.declared_md5)
            .bind(now)
            .bind(&item.remote_id)
            .bind(&item.display_name)
            .bind(&item.content_type)
            .bind(item.modified_at)
            .bind(byte_size)
            .bind(&item.declared_md5)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            if changed {
                UpsertChange::MetadataChanged
            } else {
                sqlx::query("UPDATE remote_items SET last_checked_at = ? WHERE remote_id = ?")
                    .bind(now)
                    .bind(&item.remote_id)
                    .execute(&mut *tx)
                    .await?;
                UpsertChange::Refreshed
            }
        };

        let row = sqlx::query_as::<_, RemoteItemRow>(concat!(
            "SELECT ",
            item_columns!(),
            " FROM remote_items WHERE remote_id = ?"
        ))
        .bind(&item.remote_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        if change == UpsertChange::MetadataChanged {
            debug!("Remote metadata changed");
        }

        Ok(UpsertOutcome {
            record: row.try_into()?,
            change,
        })
    }

    async fn promote_discovered(&self) -> Result<u64> {
        let promoted = sqlx::query(
            "UPDATE remote_items SET sync_state = 'pending_download', state_changed_at = ? \
             WHERE sync_state = 'discovered'",
        )
        .bind(self.now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if promoted > 0 {
            info!(promoted, "Queued discovered items for download");
        }
        Ok(promoted)
    }

    async fn claim_for_download(&self, remote_id: &str) -> Result<Option<RemoteItemRecord>> {
        let row = sqlx::query_as::<_, RemoteItemRow>(concat!(
            "UPDATE remote_items SET sync_state = 'downloading', state_changed_at = ? \
             WHERE remote_id = ? AND sync_state = 'pending_download' RETURNING ",
            item_columns!()
        ))
        .bind(self.now())
        .bind(remote_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RemoteItemRecord::try_from).transpose()
    }

    #[instrument(skip(self, local_path, byte_size))]
    async fn commit_verified(
        &self,
        remote_id: &str,
        content_hash: &str,
        local_path: &str,
        byte_size: u64,
    ) -> Result<CommitOutcome> {
        let now = self.now();
        let mut tx = self.pool.begin().await?;

        let entry: ContentEntry = sqlx::query_as::<_, ContentEntryRow>(concat!(
            "INSERT INTO content_entries (content_hash, canonical_local_path, reference_count, \
             byte_size, committed_at) VALUES (?, ?, 1, ?, ?) \
             ON CONFLICT(content_hash) DO UPDATE SET reference_count = reference_count + 1 \
             RETURNING ",
            content_columns!()
        ))
        .bind(content_hash)
        .bind(local_path)
        .bind(to_sql_size(byte_size)?)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?
        .try_into()?;

        let canonical = entry.reference_count == 1;
        let (state, path) = if canonical {
            (SyncState::Verified, Some(entry.canonical_local_path.as_str()))
        } else {
            (SyncState::Duplicate, None)
        };

        let row = sqlx::query_as::<_, RemoteItemRow>(concat!(
            "UPDATE remote_items SET sync_state = ?, content_hash = ?, local_path = ?, \
             last_error = NULL, state_changed_at = ? \
             WHERE remote_id = ? AND sync_state = 'downloading' RETURNING ",
            item_columns!()
        ))
        .bind(state.as_str())
        .bind(content_hash)
        .bind(path)
        .bind(now)
        .bind(remote_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping `tx` rolls back the reference count increment.
        let Some(row) = row else {
            return Err(ManifestError::InvalidTransition {
                remote_id: remote_id.to_string(),
                expected: SyncState::Downloading.to_string(),
            });
        };

        tx.commit().await?;

        debug!(
            state = %state,
            reference_count = entry.reference_count,
            "Committed content"
        );

        Ok(CommitOutcome {
            record: row.try_into()?,
            entry,
            canonical,
        })
    }

    async fn mark_failed(&self, remote_id: &str, reason: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE remote_items SET sync_state = 'failed', last_error = ?, state_changed_at = ? \
             WHERE remote_id = ? AND sync_state = 'downloading'",
        )
        .bind(reason)
        .bind(self.now())
        .bind(remote_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(ManifestError::InvalidTransition {
                remote_id: remote_id.to_string(),
                expected: SyncState::Downloading.to_string(),
            });
        }
        Ok(())
    }

    async fn release_claim(&self, remote_id: &str) -> Result<bool> {
        let released = sqlx::query(
            "UPDATE remote_items SET sync_state = 'pending_download', state_changed_at = ? \
             WHERE remote_id = ? AND sync_state = 'downloading'",
        )
        .bind(self.now())
        .bind(remote_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(released == 1)
    }

    async fn requeue_stale_claims(&self, claimed_before: i64) -> Result<u64> {
        let requeued = sqlx::query(
            "UPDATE remote_items SET sync_state = 'pending_download', state_changed_at = ? \
             WHERE sync_state = 'downloading' AND state_changed_at <= ?",
        )
        .bind(self.now())
        .bind(claimed_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if requeued > 0 {
            info!(requeued, "Requeued abandoned download claims");
        }
        Ok(requeued)
    }

    async fn requeue_failed(&self, failed_before: i64) -> Result<u64> {
        let requeued = sqlx::query(
            "UPDATE remote_items SET sync_state = 'pending_download', last_error = NULL, \
             state_changed_at = ? WHERE sync_state = 'failed' AND state_changed_at <= ?",
        )
        .bind(self.now())
        .bind(failed_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if requeued > 0 {
            info!(requeued, "Requeued failed items after cool-down");
        }
        Ok(requeued)
    }

    async fn list_by_state(
        &self,
        state: SyncState,
        after: Option<&str>,
        limit: u32,
    ) -> Result<Vec<RemoteItemRecord>> {
        let rows = sqlx::query_as::<_, RemoteItemRow>(concat!(
            "SELECT ",
            item_columns!(),
            " FROM remote_items WHERE sync_state = ? AND (? IS NULL OR remote_id > ?) \
             ORDER BY remote_id LIMIT ?"
        ))
        .bind(state.as_str())
        .bind(after)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RemoteItemRecord::try_from).collect()
    }

    async fn find(&self, remote_id: &str) -> Result<Option<RemoteItemRecord>> {
        self.fetch_item(remote_id).await
    }

    async fn find_content(&self, content_hash: &str) -> Result<Option<ContentEntry>> {
        let row = sqlx::query_as::<_, ContentEntryRow>(concat!(
            "SELECT ",
            content_columns!(),
            " FROM content_entries WHERE content_hash = ?"
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ContentEntry::try_from).transpose()
    }

    async fn list_content(&self, after: Option<&str>, limit: u32) -> Result<Vec<ContentEntry>> {
        let rows = sqlx::query_as::<_, ContentEntryRow>(concat!(
            "SELECT ",
            content_columns!(),
            " FROM content_entries WHERE (? IS NULL OR content_hash > ?) \
             ORDER BY content_hash LIMIT ?"
        ))
        .bind(after)
        .bind(after)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContentEntry::try_from).collect()
    }

    async fn state_counts(&self) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT sync_state, COUNT(*) FROM remote_items GROUP BY sync_state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            counts.set(state.parse()?, non_negative(count, "count")?);
        }
        Ok(counts)
    }

    async fn content_summary(&self) -> Result<ContentSummary> {
        let (unique_entries, stored_bytes, bytes_saved): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(byte_size), 0), \
             COALESCE(SUM((reference_count - 1) * byte_size), 0) FROM content_entries",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ContentSummary {
            unique_entries: non_negative(unique_entries, "unique_entries")?,
            stored_bytes: non_negative(stored_bytes, "stored_bytes")?,
            bytes_saved: non_negative(bytes_saved, "bytes_saved")?,
        })
    }

    async fn outstanding_bytes(&self) -> Result<u64> {
        let (total,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(byte_size), 0) FROM remote_items \
             WHERE sync_state IN ('discovered', 'pending_download', 'downloading', 'failed')",
        )
        .fetch_one(&self.pool)
        .await?;

        non_negative(total, "outstanding_bytes")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use bridge_traits::time::ManualClock;

    const HASH_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const HASH_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    async fn store_at(now: i64) -> (SqliteManifestStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        let pool = create_test_pool().await.unwrap();
        (SqliteManifestStore::new(pool, clock.clone()), clock)
    }

    fn item(id: &str, size: u64) -> RemoteItemDescriptor {
        RemoteItemDescriptor::new(id, format!("{id}.jpg"), 1_600_000_000, size)
            .with_content_type("image/jpeg")
    }

    async fn claimed(store: &SqliteManifestStore, id: &str, size: u64) {
        store.upsert_discovered(&item(id, size)).await.unwrap();
        store.promote_discovered().await.unwrap();
        store.claim_for_download(id).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_apart_from_last_checked() {
        let (store, clock) = store_at(1_000).await;

        let first = store.upsert_discovered(&item("a", 10)).await.unwrap();
        assert_eq!(first.change, UpsertChange::Inserted);
        assert_eq!(first.record.sync_state, SyncState::Discovered);
        assert_eq!(first.record.first_seen_at, 1_000);

        clock.advance(60);
        let second = store.upsert_discovered(&item("a", 10)).await.unwrap();
        assert_eq!(second.change, UpsertChange::Refreshed);

        let mut expected = first.record.clone();
        expected.last_checked_at = 1_060;
        assert_eq!(second.record, expected);
    }

    #[tokio::test]
    async fn test_upsert_updates_metadata_without_resetting_state() {
        let (store, _clock) = store_at(1_000).await;
        claimed(&store, "a", 10).await;
        store.commit_verified("a", HASH_A, "aa/a.jpg", 10).await.unwrap();

        let renamed = RemoteItemDescriptor::new("a", "renamed.jpg", 1_700_000_000, 10);
        let outcome = store.upsert_discovered(&renamed).await.unwrap();

        assert_eq!(outcome.change, UpsertChange::MetadataChanged);
        assert_eq!(outcome.record.display_name, "renamed.jpg");
        assert_eq!(outcome.record.content_type, None);
        assert_eq!(outcome.record.sync_state, SyncState::Verified);
        assert_eq!(outcome.record.content_hash.as_deref(), Some(HASH_A));
    }

    #[tokio::test]
    async fn test_declared_md5_is_stored_and_tracked() {
        let (store, _clock) = store_at(1_000).await;
        let with_md5 = item("a", 10).with_declared_md5("0cc175b9c0f1b6a831c399e269772661");

        let first = store.upsert_discovered(&with_md5).await.unwrap();
        assert_eq!(
            first.record.declared_md5.as_deref(),
            Some("0cc175b9c0f1b6a831c399e269772661")
        );

        let again = store.upsert_discovered(&with_md5).await.unwrap();
        assert_eq!(again.change, UpsertChange::Refreshed);

        let replaced = item("a", 10).with_declared_md5("92eb5ffee6ae2fec3ad71c777531578f");
        let outcome = store.upsert_discovered(&replaced).await.unwrap();
        assert_eq!(outcome.change, UpsertChange::MetadataChanged);
        assert_eq!(
            outcome.record.declared_md5.as_deref(),
            Some("92eb5ffee6ae2fec3ad71c777531578f")
        );
    }

    #[tokio::test]
    async fn test_claim_succeeds_once() {
        let (store, _clock) = store_at(1_000).await;
        store.upsert_discovered(&item("a", 10)).await.unwrap();

        // Discovered items are not claimable until triaged.
        assert!(store.claim_for_download("a").await.unwrap().is_none());

        assert_eq!(store.promote_discovered().await.unwrap(), 1);
        let claimed = store.claim_for_download("a").await.unwrap().unwrap();
        assert_eq!(claimed.sync_state, SyncState::Downloading);

        assert!(store.claim_for_download("a").await.unwrap().is_none());
        assert!(store.claim_for_download("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_canonical_then_duplicate() {
        let (store, _clock) = store_at(1_000).await;
        claimed(&store, "a", 10).await;
        claimed(&store, "b", 10).await;

        let first = store.commit_verified("a", HASH_A, "aa/a.jpg", 10).await.unwrap();
        assert!(first.canonical);
        assert_eq!(first.record.sync_state, SyncState::Verified);
        assert_eq!(first.record.local_path.as_deref(), Some("aa/a.jpg"));
        assert_eq!(first.entry.reference_count, 1);

        let second = store.commit_verified("b", HASH_A, "aa/b.jpg", 10).await.unwrap();
        assert!(!second.canonical);
        assert_eq!(second.record.sync_state, SyncState::Duplicate);
        assert_eq!(second.record.local_path, None);
        assert_eq!(second.record.content_hash.as_deref(), Some(HASH_A));
        assert_eq!(second.entry.reference_count, 2);
        assert_eq!(second.entry.canonical_local_path, "aa/a.jpg");

        let summary = store.content_summary().await.unwrap();
        assert_eq!(summary.unique_entries, 1);
        assert_eq!(summary.stored_bytes, 10);
        assert_eq!(summary.bytes_saved, 10);
    }

    #[tokio::test]
    async fn test_commit_requires_claim_and_rolls_back() {
        let (store, _clock) = store_at(1_000).await;
        store.upsert_discovered(&item("a", 10)).await.unwrap();

        let err = store
            .commit_verified("a", HASH_A, "aa/a.jpg", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ManifestError::InvalidTransition { .. }));
        assert!(store.find_content(HASH_A).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_failed_and_cooldown_requeue() {
        let (store, clock) = store_at(1_000).await;
        claimed(&store, "a", 10).await;

        store.mark_failed("a", "connection reset").await.unwrap();
        let failed = store.find("a").await.unwrap().unwrap();
        assert_eq!(failed.sync_state, SyncState::Failed);
        assert_eq!(failed.last_error.as_deref(), Some("connection reset"));

        // Not cooled down yet.
        assert_eq!(store.requeue_failed(999).await.unwrap(), 0);

        clock.advance(3_600);
        assert_eq!(store.requeue_failed(1_000).await.unwrap(), 1);
        let requeued = store.find("a").await.unwrap().unwrap();
        assert_eq!(requeued.sync_state, SyncState::PendingDownload);
        assert_eq!(requeued.last_error, None);
    }

    #[tokio::test]
    async fn test_mark_failed_rejects_unclaimed() {
        let (store, _clock) = store_at(1_000).await;
        store.upsert_discovered(&item("a", 10)).await.unwrap();
        assert!(store.mark_failed("a", "nope").await.is_err());
    }

    #[tokio::test]
    async fn test_stale_claims_are_requeued() {
        let (store, clock) = store_at(1_000).await;
        claimed(&store, "old", 10).await;
        clock.advance(600);
        claimed(&store, "fresh", 10).await;

        let requeued = store.requeue_stale_claims(1_300).await.unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(
            store.find("old").await.unwrap().unwrap().sync_state,
            SyncState::PendingDownload
        );
        assert_eq!(
            store.find("fresh").await.unwrap().unwrap().sync_state,
            SyncState::Downloading
        );
    }

    #[tokio::test]
    async fn test_release_claim() {
        let (store, _clock) = store_at(1_000).await;
        claimed(&store, "a", 10).await;

        assert!(store.release_claim("a").await.unwrap());
        assert!(!store.release_claim("a").await.unwrap());
        assert_eq!(
            store.find("a").await.unwrap().unwrap().sync_state,
            SyncState::PendingDownload
        );
    }

    #[tokio::test]
    async fn test_state_pager_walks_every_record() {
        let (store, _clock) = store_at(1_000).await;
        for i in 0..7 {
            store.upsert_discovered(&item(&format!("item-{i}"), 1)).await.unwrap();
        }

        let mut pager = StatePager::new(&store, SyncState::Discovered, 3);
        let mut seen = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            assert!(page.len() <= 3);
            seen.extend(page.into_iter().map(|r| r.remote_id));
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(seen.first().map(String::as_str), Some("item-0"));
        assert_eq!(pager.position(), Some("item-6"));

        let mut resumed = StatePager::new(&store, SyncState::Discovered, 10).resume_after("item-4");
        let rest = resumed.next_page().await.unwrap().unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn test_counts_and_outstanding_bytes() {
        let (store, _clock) = store_at(1_000).await;
        claimed(&store, "a", 10).await;
        store.commit_verified("a", HASH_A, "aa/a.jpg", 10).await.unwrap();
        claimed(&store, "b", 20).await;
        store.commit_verified("b", HASH_B, "bb/b.jpg", 20).await.unwrap();
        claimed(&store, "d", 40).await;
        store.mark_failed("d", "gone").await.unwrap();
        store.upsert_discovered(&item("c", 30)).await.unwrap();

        let counts = store.state_counts().await.unwrap();
        assert_eq!(counts.verified, 2);
        assert_eq!(counts.discovered, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.total(), 4);

        assert_eq!(store.outstanding_bytes().await.unwrap(), 70);

        let entries = store.list_content(None, 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content_hash, HASH_A);
        let after_a = store.list_content(Some(HASH_A), 10).await.unwrap();
        assert_eq!(after_a.len(), 1);
    }
}
