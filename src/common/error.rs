use thiserror::Error;

use super::types::{FrameId, PageId};

/// Database error types
#[derive(Error, Debug)]
pub enum CrioError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Frame {0} not found")]
    FrameNotFound(FrameId),

    #[error("Buffer pool exhausted: no evictable frames available")]
    BufferExhausted,

    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),

    #[error("Invalid frame ID: {0}")]
    InvalidFrameId(FrameId),

    #[error("Page {0} is still pinned")]
    PageStillPinned(PageId),

    #[error("Failed to evict a page")]
    EvictionFailed,

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Key not found")]
    NotFound,

    #[error("Tree is empty")]
    EmptyStore,

    #[error("Corrupt page {0}: {1}")]
    CorruptPage(PageId, String),
}

pub type Result<T> = std::result::Result<T, CrioError>;
