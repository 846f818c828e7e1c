use crate::error::EditError;
use crate::types::{ChatId, InboundEvent, MessageId, SentMessage};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use vq_queue::SubmissionId;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Unique channel identifier, e.g. "telegram".
    fn channel_id(&self) -> &str;

    /// Start receiving updates. Push to tx for each inbound event.
    async fn start(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()>;

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<SentMessage>;

    /// Reply to a submission with a message carrying a cancel button for it.
    async fn reply_with_cancel(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
        submission_id: SubmissionId,
    ) -> Result<SentMessage>;

    /// Replace the text of a sent message. `cancel` keeps (or drops) the
    /// cancel button.
    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        cancel: Option<SubmissionId>,
    ) -> std::result::Result<(), EditError>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
