use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum CairnError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Buffer pool is full, no evictable frames available")]
    BufferPoolFull,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Invalid database file")]
    InvalidDatabaseFile,

    #[error("Header page is full")]
    HeaderPageFull,

    #[error("Index {0} already registered in header page")]
    IndexAlreadyExists(String),
}

pub type Result<T> = std::result::Result<T, CairnError>;
