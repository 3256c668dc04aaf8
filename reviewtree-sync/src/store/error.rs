use reviewtree_core::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("node not found: {0}")]
    NotFound(String),
    #[error("tree document key is unknown; load the tree first")]
    MissingDocumentKey,
    #[error("tree document unusable: {0}")]
    TreeDocument(String),
    #[error("api error: {0}")]
    Api(#[from] ApiError),
}

/// Coarse error family callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Api,
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Validation(_) => ErrorKind::Validation,
            StoreError::NotFound(_) | StoreError::MissingDocumentKey => ErrorKind::NotFound,
            StoreError::TreeDocument(_) | StoreError::Api(_) => ErrorKind::Api,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation(message.into())
    }
}
