//! Error types for the store layer.

use rookline_protocol::{FailureKind, ProtocolError};

/// Errors returned by a [`SessionStore`](crate::SessionStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No row with that key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated (room code, move number).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A write precondition did not hold, or the row no longer accepts
    /// writes.
    #[error("condition failed: {0}")]
    ConditionFailed(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl StoreError {
    /// Rebuilds an error reported by a remote store host.
    pub fn from_failure(kind: FailureKind, message: String) -> Self {
        match kind {
            FailureKind::NotFound => Self::NotFound(message),
            FailureKind::Conflict => Self::Conflict(message),
            FailureKind::ConditionFailed => Self::ConditionFailed(message),
            FailureKind::Unavailable => Self::Unavailable(message),
            FailureKind::BadRequest => {
                Self::Protocol(ProtocolError::InvalidMessage(message))
            }
        }
    }

    /// The wire classification of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_) => FailureKind::NotFound,
            Self::Conflict(_) => FailureKind::Conflict,
            Self::ConditionFailed(_) => FailureKind::ConditionFailed,
            Self::Unavailable(_) => FailureKind::Unavailable,
            Self::Protocol(_) => FailureKind::BadRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_round_trip() {
        for kind in [
            FailureKind::NotFound,
            FailureKind::Conflict,
            FailureKind::ConditionFailed,
            FailureKind::Unavailable,
            FailureKind::BadRequest,
        ] {
            let err = StoreError::from_failure(kind, "x".into());
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::ConditionFailed("turn is black".into());
        assert_eq!(err.to_string(), "condition failed: turn is black");
    }
}
