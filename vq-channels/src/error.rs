use thiserror::Error;

/// Outcome of a failed message edit.
#[derive(Debug, Error)]
pub enum EditError {
    /// Telegram refused the edit because text and markup are unchanged.
    #[error("message is not modified")]
    NotModified,

    #[error("edit failed: {0}")]
    Failed(String),
}

impl From<reqwest::Error> for EditError {
    fn from(e: reqwest::Error) -> Self {
        Self::Failed(e.to_string())
    }
}

impl From<anyhow::Error> for EditError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(format!("{e:#}"))
    }
}
