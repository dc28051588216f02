use thiserror::Error;

use crate::ids::GeneratedId;

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("not authorized: {0}")]
    NotAuthorized(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("indexing cancelled")]
    Cancelled,
    #[error("mail group {0} has no spam folder")]
    MissingSpamFolder(GeneratedId),
}

impl IndexError {
    /// True for the per-item failures that skip a single mail instead of
    /// aborting the surrounding batch.
    pub fn is_skippable(&self) -> bool {
        matches!(self, IndexError::NotFound(_) | IndexError::NotAuthorized(_))
    }
}
