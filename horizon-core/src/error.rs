use crate::document::DocPath;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(DocPath),

    #[error("Document already exists: {0}")]
    AlreadyExists(DocPath),

    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction read issued after staged writes")]
    ReadAfterWrite,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Errors worth retrying a whole commit for. `AlreadyExists` is handled
    /// separately by callers that can regenerate the contested id.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict(_) | StoreError::Unavailable(_))
    }
}
