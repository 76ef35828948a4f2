//! # Sync Run Repository
//!
//! Database persistence for the run journal in `sync_runs`.

use crate::job::{RunCounts, RunKind, SyncRun, SyncRunId};
use crate::{Result, SyncError};
use async_trait::async_trait;
use core_runtime::EnumerationMode;
use sqlx::{FromRow, SqlitePool};

const RUN_COLUMNS: &str = "id, kind, mode, status, items_seen, items_new, items_failed, \
                           checkpoint, error_message, started_at, completed_at";

// ============================================================================
// Repository Trait
// ============================================================================

/// Repository trait for run journal persistence
#[async_trait]
pub trait SyncRunRepository: Send + Sync {
    /// Journal a newly started run
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails
    async fn insert(&self, run: &SyncRun) -> Result<()>;

    /// Persist the current status and counters of a run
    ///
    /// # Errors
    ///
    /// Returns an error if the run doesn't exist or the database operation fails
    async fn update(&self, run: &SyncRun) -> Result<()>;

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRun>>;

    /// Most recent run of `kind`, whatever its status
    async fn latest(&self, kind: RunKind) -> Result<Option<SyncRun>>;

    /// Most recent completed run of `kind`
    async fn latest_completed(&self, kind: RunKind) -> Result<Option<SyncRun>>;

    /// Checkpoint left by the most recent completed enumeration that set one
    async fn latest_checkpoint(&self) -> Result<Option<i64>>;

    /// Run history, most recent first
    async fn history(&self, limit: u32) -> Result<Vec<SyncRun>>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite implementation of SyncRunRepository
pub struct SqliteSyncRunRepository {
    pool: SqlitePool,
}

impl SqliteSyncRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a sync run
#[derive(Debug, FromRow)]
struct SyncRunRow {
    id: String,
    kind: String,
    mode: Option<String>,
    status: String,
    items_seen: i64,
    items_new: i64,
    items_failed: i64,
    checkpoint: Option<i64>,
    error_message: Option<String>,
    started_at: i64,
    completed_at: Option<i64>,
}

impl TryFrom<SyncRunRow> for SyncRun {
    type Error = SyncError;

    fn try_from(row: SyncRunRow) -> Result<Self> {
        let mode = row
            .mode
            .as_deref()
            .map(str::parse::<EnumerationMode>)
            .transpose()
            .map_err(|e| SyncError::StoreUnavailable(format!("Invalid run mode: {}", e)))?;

        Ok(SyncRun {
            id: SyncRunId::from_string(&row.id)?,
            kind: row.kind.parse()?,
            mode,
            status: row.status.parse()?,
            counts: RunCounts::new(
                row.items_seen.max(0) as u64,
                row.items_new.max(0) as u64,
                row.items_failed.max(0) as u64,
            ),
            checkpoint: row.checkpoint,
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> SyncError {
    SyncError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl SyncRunRepository for SqliteSyncRunRepository {
    async fn insert(&self, run: &SyncRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_runs (
                id, kind, mode, status,
                items_seen, items_new, items_failed,
                checkpoint, error_message, started_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.as_str())
        .bind(run.kind.as_str())
        .bind(run.mode.map(|m| m.as_str()))
        .bind(run.status.as_str())
        .bind(run.counts.items_seen as i64)
        .bind(run.counts.items_new as i64)
        .bind(run.counts.items_failed as i64)
        .bind(run.checkpoint)
        .bind(&run.error_message)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn update(&self, run: &SyncRun) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sync_runs SET
                status = ?,
                items_seen = ?,
                items_new = ?,
                items_failed = ?,
                checkpoint = ?,
                error_message = ?,
                completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.status.as_str())
        .bind(run.counts.items_seen as i64)
        .bind(run.counts.items_new as i64)
        .bind(run.counts.items_failed as i64)
        .bind(run.checkpoint)
        .bind(&run.error_message)
        .bind(run.completed_at)
        .bind(run.id.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(SyncError::RunNotFound {
                run_id: run.id.to_string(),
            });
        }

        Ok(())
    }

    async fn find_by_id(&self, id: &SyncRunId) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            "SELECT {} FROM sync_runs WHERE id = ?",
            RUN_COLUMNS
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(SyncRun::try_from).transpose()
    }

    async fn latest(&self, kind: RunKind) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            "SELECT {} FROM sync_runs WHERE kind = ? ORDER BY started_at DESC, rowid DESC LIMIT 1",
            RUN_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(SyncRun::try_from).transpose()
    }

    async fn latest_completed(&self, kind: RunKind) -> Result<Option<SyncRun>> {
        let row = sqlx::query_as::<_, SyncRunRow>(&format!(
            r#"
            SELECT {} FROM sync_runs
            WHERE kind = ? AND status = 'completed'
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
            RUN_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(SyncRun::try_from).transpose()
    }

    async fn latest_checkpoint(&self) -> Result<Option<i64>> {
        let checkpoint: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT checkpoint FROM sync_runs
            WHERE kind = 'enumerate' AND status = 'completed' AND checkpoint IS NOT NULL
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(checkpoint)
    }

    async fn history(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let rows = sqlx::query_as::<_, SyncRunRow>(&format!(
            "SELECT {} FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?",
            RUN_COLUMNS
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(SyncRun::try_from)
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::RunStatus;
    use core_manifest::create_test_pool;

    async fn repository() -> SqliteSyncRunRepository {
        SqliteSyncRunRepository::new(create_test_pool().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = repository().await;
        let run = SyncRun::start(RunKind::Enumerate, Some(EnumerationMode::Full), 100);

        repo.insert(&run).await.unwrap();
        let found = repo.find_by_id(&run.id).await.unwrap().unwrap();
        assert_eq!(found, run);
    }

    #[tokio::test]
    async fn test_update_persists_completion() {
        let repo = repository().await;
        let run = SyncRun::start(RunKind::Download, None, 100);
        repo.insert(&run).await.unwrap();

        let run = run.complete(RunCounts::new(3, 2, 1), None, 130).unwrap();
        repo.update(&run).await.unwrap();

        let found = repo.find_by_id(&run.id).await.unwrap().unwrap();
        assert_eq!(found.status, RunStatus::Completed);
        assert_eq!(found.counts, RunCounts::new(3, 2, 1));
        assert_eq!(found.completed_at, Some(130));
    }

    #[tokio::test]
    async fn test_update_missing_run_fails() {
        let repo = repository().await;
        let run = SyncRun::start(RunKind::Verify, Some(EnumerationMode::Full), 1);
        assert!(matches!(
            repo.update(&run).await,
            Err(SyncError::RunNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_latest_checkpoint_ignores_failed_and_running_runs() {
        let repo = repository().await;
        assert_eq!(repo.latest_checkpoint().await.unwrap(), None);

        let first = SyncRun::start(RunKind::Enumerate, Some(EnumerationMode::Full), 100);
        repo.insert(&first).await.unwrap();
        let first = first
            .complete(RunCounts::new(5, 5, 0), Some(100), 110)
            .unwrap();
        repo.update(&first).await.unwrap();

        let aborted = SyncRun::start(RunKind::Enumerate, Some(EnumerationMode::Incremental), 200);
        repo.insert(&aborted).await.unwrap();
        let aborted = aborted
            .fail(RunCounts::new(2, 0, 0), "page failed".to_string(), 205)
            .unwrap();
        repo.update(&aborted).await.unwrap();

        let running = SyncRun::start(RunKind::Enumerate, Some(EnumerationMode::Incremental), 300);
        repo.insert(&running).await.unwrap();

        assert_eq!(repo.latest_checkpoint().await.unwrap(), Some(100));
        assert_eq!(
            repo.latest(RunKind::Enumerate).await.unwrap().unwrap().id,
            running.id
        );
        assert_eq!(
            repo.latest_completed(RunKind::Enumerate)
                .await
                .unwrap()
                .unwrap()
                .id,
            first.id
        );
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first() {
        let repo = repository().await;
        for (i, kind) in [RunKind::Enumerate, RunKind::Download, RunKind::Verify]
            .into_iter()
            .enumerate()
        {
            repo.insert(&SyncRun::start(kind, None, i as i64)).await.unwrap();
        }

        let history = repo.history(2).await.unwrap();
        let kinds: Vec<_> = history.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RunKind::Verify, RunKind::Download]);
    }
}
