//! Chat transports for voxqueue.
//!
//! Transports are pure I/O: they turn platform updates into [`InboundEvent`]s
//! and perform the outbound calls the queue notices need.

mod error;
mod telegram;
mod traits;
mod types;

pub use error::EditError;
pub use telegram::TelegramAdapter;
pub use traits::ChatTransport;
pub use types::{
    AudioSubmission, CancelRequest, ChatId, CommandMessage, InboundEvent, MediaKind, MessageId,
    SentMessage, cancel_callback_data, parse_cancel_callback,
};
