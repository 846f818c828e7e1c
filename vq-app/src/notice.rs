//! Queue notices rendered as chat messages with a cancel button.

use crate::texts;
use async_trait::async_trait;
use std::sync::Arc;
use vq_channels::{AudioSubmission, ChatId, ChatTransport, EditError, MessageId};
use vq_queue::{
    Announcer, Notice, NoticeError, NoticeHandle, NoticeId, QueuePosition, QueuedJob, SubmissionId,
};

pub struct ChatNotice {
    transport: Arc<dyn ChatTransport>,
    chat_id: ChatId,
    message_id: MessageId,
    submission_id: SubmissionId,
}

#[async_trait]
impl NoticeHandle for ChatNotice {
    fn id(&self) -> NoticeId {
        NoticeId::new(self.message_id.get())
    }

    async fn update(&self, position: QueuePosition) -> Result<(), NoticeError> {
        self.transport
            .edit_text(
                self.chat_id,
                self.message_id,
                &texts::queue_position(position),
                Some(self.submission_id),
            )
            .await
            .map_err(notice_error)
    }
}

fn notice_error(error: EditError) -> NoticeError {
    match error {
        EditError::NotModified => NoticeError::NotModified,
        EditError::Failed(message) => NoticeError::Delivery(message),
    }
}

pub struct ChatAnnouncer {
    transport: Arc<dyn ChatTransport>,
}

impl ChatAnnouncer {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl Announcer<AudioSubmission> for ChatAnnouncer {
    async fn announce(
        &self,
        job: &AudioSubmission,
        position: QueuePosition,
    ) -> Result<Notice, NoticeError> {
        let submission_id = job.submission_id();
        let sent = self
            .transport
            .reply_with_cancel(
                job.chat_id,
                job.message_id,
                &texts::queue_position(position),
                submission_id,
            )
            .await
            .map_err(|e| NoticeError::Delivery(format!("{e:#}")))?;
        Ok(Arc::new(ChatNotice {
            transport: Arc::clone(&self.transport),
            chat_id: sent.chat_id,
            message_id: sent.message_id,
            submission_id,
        }))
    }

    async fn notify_failure(&self, job: &AudioSubmission) -> Result<(), NoticeError> {
        self.transport
            .send_text(job.chat_id, texts::SOMETHING_WENT_WRONG, Some(job.message_id))
            .await
            .map(|_| ())
            .map_err(|e| NoticeError::Delivery(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::ChatAnnouncer;
    use crate::testing::FakeTransport;
    use crate::texts;
    use std::sync::Arc;
    use vq_channels::{AudioSubmission, ChatId, MediaKind, MessageId};
    use vq_queue::{Announcer, NoticeError, QueuePosition, UserId};

    fn submission(message_id: i64) -> AudioSubmission {
        AudioSubmission {
            chat_id: ChatId::new(1),
            user_id: UserId::new(2),
            message_id: MessageId::new(message_id),
            file_id: "f".to_string(),
            kind: MediaKind::Audio,
            file_name: Some("memo.m4a".to_string()),
            received_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn notice_keeps_cancel_button_when_position_changes() {
        let transport = Arc::new(FakeTransport::default());
        let announcer = ChatAnnouncer::new(transport.clone());
        let notice = announcer
            .announce(&submission(30), QueuePosition::at_index(2, true))
            .await
            .expect("announce");

        let moved = QueuePosition::at_index(1, true);
        notice.update(moved).await.expect("update");
        assert_eq!(
            transport.edits(),
            vec![(notice.id().get(), texts::queue_position(moved), Some(30))]
        );

        let err = notice.update(moved).await.expect_err("same text");
        assert!(matches!(err, NoticeError::NotModified));
        assert!(err.is_benign());
    }

    #[tokio::test]
    async fn failure_notice_replies_to_the_submission() {
        let transport = Arc::new(FakeTransport::default());
        ChatAnnouncer::new(transport.clone())
            .notify_failure(&submission(31))
            .await
            .expect("notify");
        assert_eq!(
            transport.texts(),
            vec![texts::SOMETHING_WENT_WRONG.to_string()]
        );
    }
}
