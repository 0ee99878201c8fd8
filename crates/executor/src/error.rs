use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecutorError>;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Task not found: {0}")]
    TaskNotFound(u64),

    #[error("Content store error: {0}")]
    Store(#[from] toolcore_content_store::ContentStoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}
