use thiserror::Error;

/// Errors surfaced by the file-backed store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage is read-only in this environment")]
    ReadOnly,

    #[error("invalid data: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
