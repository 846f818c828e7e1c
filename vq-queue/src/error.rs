use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Failure reported by an [`crate::Announcer`] or [`crate::NoticeHandle`].
#[derive(Debug, Error)]
pub enum NoticeError {
    /// The platform rejected an edit because the content did not change.
    #[error("notice content unchanged")]
    NotModified,

    #[error("notice delivery failed: {0}")]
    Delivery(String),
}

impl NoticeError {
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotModified)
    }
}
