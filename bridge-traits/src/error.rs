use thiserror::Error;

/// Failures reported by collaborator implementations.
///
/// The variants mirror what the sync engine needs to decide on: whether an
/// item is gone, whether the call may be retried, or whether the run has to
/// stop because the session is no longer valid.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Remote item not found: {remote_id}")]
    NotFound { remote_id: String },

    #[error("Transient remote failure: {0}")]
    Transient(String),

    #[error("Remote session expired or was rejected: {0}")]
    AuthExpired(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the same request may succeed when attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Transient(_) | BridgeError::Io(_))
    }

    /// Whether the failure invalidates the whole session.
    pub fn is_auth(&self) -> bool {
        matches!(self, BridgeError::AuthExpired(_))
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(BridgeError::Transient("503".into()).is_retryable());
        assert!(BridgeError::Io(std::io::Error::other("reset")).is_retryable());
        assert!(!BridgeError::AuthExpired("401".into()).is_retryable());
        assert!(!BridgeError::NotFound {
            remote_id: "a".into()
        }
        .is_retryable());
        assert!(BridgeError::AuthExpired("401".into()).is_auth());
    }
}
