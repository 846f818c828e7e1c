//! In-memory chat transport for gateway and notice tests.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::mpsc;
use vq_channels::{ChatId, ChatTransport, EditError, InboundEvent, MessageId, SentMessage};
use vq_queue::SubmissionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text {
        message_id: i64,
        text: String,
        reply_to: Option<i64>,
    },
    WithCancel {
        message_id: i64,
        reply_to: i64,
        text: String,
        submission_id: i64,
    },
}

#[derive(Default)]
pub struct FakeTransport {
    next_message_id: AtomicI64,
    sent: Mutex<Vec<Sent>>,
    edits: Mutex<Vec<(i64, String, Option<i64>)>>,
    deleted: Mutex<Vec<i64>>,
    answers: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeTransport {
    fn allocate(&self) -> i64 {
        10_000 + self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::Text { text, .. } => Some(text),
                Sent::WithCancel { .. } => None,
            })
            .collect()
    }

    /// Queue notices as `(notice message id, submission id, text)`.
    pub fn notices(&self) -> Vec<(i64, i64, String)> {
        self.sent()
            .into_iter()
            .filter_map(|sent| match sent {
                Sent::WithCancel {
                    message_id,
                    submission_id,
                    text,
                    ..
                } => Some((message_id, submission_id, text)),
                Sent::Text { .. } => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<(i64, String, Option<i64>)> {
        self.edits.lock().expect("edits lock").clone()
    }

    pub fn deleted(&self) -> Vec<i64> {
        self.deleted.lock().expect("deleted lock").clone()
    }

    pub fn answers(&self) -> Vec<(String, Option<String>)> {
        self.answers.lock().expect("answers lock").clone()
    }
}

#[async_trait]
impl ChatTransport for FakeTransport {
    fn channel_id(&self) -> &str {
        "fake"
    }

    async fn start(&self, _tx: mpsc::Sender<InboundEvent>) -> Result<()> {
        Ok(())
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<SentMessage> {
        let message_id = self.allocate();
        self.sent.lock().expect("sent lock").push(Sent::Text {
            message_id,
            text: text.to_string(),
            reply_to: reply_to.map(MessageId::get),
        });
        Ok(SentMessage {
            chat_id,
            message_id: MessageId::new(message_id),
        })
    }

    async fn reply_with_cancel(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
        submission_id: SubmissionId,
    ) -> Result<SentMessage> {
        let message_id = self.allocate();
        self.sent.lock().expect("sent lock").push(Sent::WithCancel {
            message_id,
            reply_to: reply_to.get(),
            text: text.to_string(),
            submission_id: submission_id.get(),
        });
        Ok(SentMessage {
            chat_id,
            message_id: MessageId::new(message_id),
        })
    }

    async fn edit_text(
        &self,
        _chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        cancel: Option<SubmissionId>,
    ) -> std::result::Result<(), EditError> {
        let mut edits = self.edits.lock().expect("edits lock");
        let current = edits
            .iter()
            .rev()
            .find(|(id, _, _)| *id == message_id.get())
            .map(|(_, text, _)| text.clone())
            .or_else(|| {
                self.sent().into_iter().find_map(|sent| match sent {
                    Sent::WithCancel {
                        message_id: id,
                        text,
                        ..
                    } if id == message_id.get() => Some(text),
                    _ => None,
                })
            });
        if current.as_deref() == Some(text) {
            return Err(EditError::NotModified);
        }
        edits.push((
            message_id.get(),
            text.to_string(),
            cancel.map(SubmissionId::get),
        ));
        Ok(())
    }

    async fn delete_message(&self, _chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.deleted
            .lock()
            .expect("deleted lock")
            .push(message_id.get());
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.answers
            .lock()
            .expect("answers lock")
            .push((callback_id.to_string(), text.map(str::to_string)));
        Ok(())
    }
}
