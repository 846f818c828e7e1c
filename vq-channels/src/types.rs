use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vq_queue::{QueuedJob, SubmissionId, UserId};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self::new(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ChatId);
id_newtype!(MessageId);

impl From<MessageId> for SubmissionId {
    fn from(value: MessageId) -> Self {
        SubmissionId::new(value.get())
    }
}

impl From<SubmissionId> for MessageId {
    fn from(value: SubmissionId) -> Self {
        MessageId::new(value.get())
    }
}

const CANCEL_QUEUE_PREFIX: &str = "cancel_queue|";

/// Callback payload carried by the cancel button of a queue notice.
pub fn cancel_callback_data(submission_id: SubmissionId) -> String {
    format!("{CANCEL_QUEUE_PREFIX}{submission_id}")
}

pub fn parse_cancel_callback(data: &str) -> Option<SubmissionId> {
    data.strip_prefix(CANCEL_QUEUE_PREFIX)?
        .trim()
        .parse::<i64>()
        .ok()
        .map(SubmissionId::new)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Voice,
    Audio,
    Video,
    VideoNote,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSubmission {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub file_id: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub file_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl QueuedJob for AudioSubmission {
    fn submission_id(&self) -> SubmissionId {
        self.message_id.into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: MessageId,
    /// Command name without the leading slash or bot mention, lowercased.
    pub command: String,
    #[serde(default)]
    pub args: String,
}

/// A press on the cancel button of a queue notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequest {
    pub callback_id: String,
    pub chat_id: ChatId,
    pub user_id: UserId,
    /// The notice message carrying the button.
    pub notice_message_id: MessageId,
    pub submission_id: SubmissionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    Audio(AudioSubmission),
    Command(CommandMessage),
    CancelQueued(CancelRequest),
}

impl InboundEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Audio(audio) => audio.user_id,
            Self::Command(command) => command.user_id,
            Self::CancelQueued(cancel) => cancel.user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

#[cfg(test)]
mod tests {
    use super::{cancel_callback_data, parse_cancel_callback};
    use vq_queue::SubmissionId;

    #[test]
    fn cancel_callback_round_trips_submission_id() {
        let data = cancel_callback_data(SubmissionId::new(4242));
        assert_eq!(data, "cancel_queue|4242");
        assert_eq!(parse_cancel_callback(&data), Some(SubmissionId::new(4242)));
    }

    #[test]
    fn foreign_callback_data_is_ignored() {
        assert_eq!(parse_cancel_callback("menu|settings"), None);
        assert_eq!(parse_cancel_callback("cancel_queue|abc"), None);
        assert_eq!(parse_cancel_callback("cancel_queue|"), None);
    }
}
