use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("STORAGE_READ: {0}")]
    Read(String),
    #[error("STORAGE_WRITE: {0}")]
    Write(String),
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),
    #[error("ENTITY_NOT_FOUND: {0}")]
    NotFound(String),
    #[error("BUSINESS_RULE: {0}")]
    BusinessRule(String),
    #[error("ENGINE_CLOSED: {0}")]
    Closed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
