use crate::error::NoticeError;
use crate::types::{NoticeId, QueuePosition};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub type Notice = Arc<dyn NoticeHandle>;

/// A user-visible "you are at position N" message with a cancel affordance.
#[async_trait]
pub trait NoticeHandle: Send + Sync {
    fn id(&self) -> NoticeId;

    /// Rewrite the displayed position. Must be idempotent.
    async fn update(&self, position: QueuePosition) -> std::result::Result<(), NoticeError>;
}

/// Produces position notices and failure messages for one submitter.
#[async_trait]
pub trait Announcer<J>: Send + Sync {
    async fn announce(
        &self,
        job: &J,
        position: QueuePosition,
    ) -> std::result::Result<Notice, NoticeError>;

    /// Best-effort generic "something went wrong" message.
    async fn notify_failure(&self, job: &J) -> std::result::Result<(), NoticeError>;
}

/// Runs one accepted job to completion.
#[async_trait]
pub trait JobProcessor<J>: Send + Sync {
    async fn process(&self, job: &J, notice: Option<Notice>) -> Result<()>;
}
