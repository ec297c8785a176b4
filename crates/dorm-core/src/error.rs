use dorm_storage::{IdentityId, StorageError};
use std::fmt;
use thiserror::Error;

/// Result alias for booking and identity operations.
pub type DormResult<T> = Result<T, DormError>;

/// Why a presented credential was rejected. Only used for logging; callers
/// never see the distinction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialFault {
    Expired,
    BadSignature,
    WrongAlgorithm,
    Malformed,
}

impl fmt::Display for CredentialFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::Expired => "expired",
            Self::BadSignature => "bad signature",
            Self::WrongAlgorithm => "wrong algorithm",
            Self::Malformed => "malformed",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum DormError {
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    #[error("slot conflict: {0}")]
    SlotConflict(String),

    #[error("reservation not found or not owned by caller")]
    NotFoundOrNotOwner,

    /// The credential verified but its identity cannot own reservations.
    #[error("identity {0} does not exist")]
    UnknownIdentity(IdentityId),

    #[error("credential rejected: {0}")]
    CredentialInvalid(CredentialFault),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("store unavailable during {operation}: {message}")]
    StoreUnavailable {
        operation: &'static str,
        message: String,
    },
}

impl DormError {
    /// Wrap a backend error that has no domain meaning for `operation`.
    pub fn store(operation: &'static str, err: StorageError) -> Self {
        Self::StoreUnavailable {
            operation,
            message: err.to_string(),
        }
    }
}
