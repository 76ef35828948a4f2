use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Manifest row is corrupt: {0}")]
    Corrupt(String),

    #[error("Remote item not found in manifest: {remote_id}")]
    NotFound { remote_id: String },

    #[error("Invalid transition for {remote_id}: expected state {expected}")]
    InvalidTransition { remote_id: String, expected: String },
}

impl ManifestError {
    /// Whether the persistence layer itself is unusable, as opposed to a
    /// single record being in an unexpected state.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ManifestError::Database(_) | ManifestError::Migration(_) | ManifestError::Corrupt(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ManifestError>;
