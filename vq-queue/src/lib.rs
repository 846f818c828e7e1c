//! Per-user audio job queue for voxqueue.
//!
//! Serializes submissions from the same user into an ordered pipeline and
//! coalesces near-simultaneous submissions into one batch before they enter
//! the FIFO. Platform I/O stays behind the [`JobProcessor`], [`Announcer`] and
//! [`NoticeHandle`] seams.

mod config;
mod error;
mod manager;
mod state;
mod traits;
mod types;
mod window;
mod worker;

pub use config::CollectionWindowConfig;
pub use error::{NoticeError, QueueError, Result};
pub use manager::QueueManager;
pub use traits::{Announcer, JobProcessor, Notice, NoticeHandle};
pub use types::{
    Admission, NoticeId, QueuePosition, QueueSnapshot, QueuedJob, StartTicket, SubmissionId,
    UserId,
};
