use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContentStoreError>;

#[derive(Error, Debug)]
pub enum ContentStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Content is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Page {page} out of range (total pages: {total_pages})")]
    PageOutOfRange { page: u32, total_pages: u32 },

    #[error("{0}")]
    Other(String),
}
