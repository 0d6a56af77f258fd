use horizon_core::StoreError;
use horizon_shared::{BookingId, BookingStatus};

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Caller is not authenticated")]
    Unauthenticated,

    #[error("Draft claims owner {claimed} but caller is {caller}")]
    IdentityMismatch { claimed: String, caller: String },

    #[error("Invalid booking draft: {0}")]
    InvalidDraft(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },

    #[error("Booking not found: {0}")]
    NotFound(BookingId),

    #[error("Commit failed after {attempts} attempts")]
    CommitFailed { attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BookingError {
    /// Whether the caller should be told "try again" rather than
    /// "fix your input".
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::CommitFailed { .. } => true,
            BookingError::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}
