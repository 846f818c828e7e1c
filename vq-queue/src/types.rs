use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::traits::Notice;

macro_rules! int_id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
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

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

int_id_newtype!(UserId);
int_id_newtype!(SubmissionId);
int_id_newtype!(NoticeId);

/// A payload the queue can hold.
///
/// The submission id orders jobs captured by one collection window and is the
/// token used to remove a queued job.
pub trait QueuedJob: Send + Sync + 'static {
    fn submission_id(&self) -> SubmissionId;
}

/// 1-based position shown to the submitter. Position 1 means "next to run".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct QueuePosition(u32);

impl QueuePosition {
    /// Display position for an item at `index` in the FIFO.
    pub fn at_index(index: usize, processing: bool) -> Self {
        let ahead = u32::try_from(index).unwrap_or(u32::MAX);
        Self(ahead.saturating_add(1).saturating_add(u32::from(processing)))
    }

    /// Display position for an item just appended to a FIFO of `queue_len`.
    pub fn after_insert(queue_len: usize, processing: bool) -> Self {
        Self::at_index(queue_len.saturating_sub(1), processing)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for QueuePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof that a job was admitted with [`Admission::StartNow`].
///
/// Handed back to `finish_processing`. A ticket issued before the user's
/// queue was cleared no longer matches and is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTicket {
    pub(crate) generation: u64,
}

/// Outcome of [`crate::QueueManager::submit`].
#[derive(Clone)]
pub enum Admission {
    /// The user was idle; the caller runs the job now and reports back with
    /// `finish_processing`, passing the ticket.
    StartNow(StartTicket),
    /// Captured by a collection window. The position notice is sent when the
    /// window flushes.
    Batched,
    /// Appended directly to the FIFO.
    Queued {
        position: QueuePosition,
        notice: Option<Notice>,
    },
}

impl Admission {
    pub fn start_now(&self) -> bool {
        matches!(self, Self::StartNow(_))
    }

    pub fn ticket(&self) -> Option<StartTicket> {
        match self {
            Self::StartNow(ticket) => Some(*ticket),
            Self::Batched | Self::Queued { .. } => None,
        }
    }

    pub fn notice(&self) -> Option<&Notice> {
        match self {
            Self::Queued { notice, .. } => notice.as_ref(),
            Self::StartNow(_) | Self::Batched => None,
        }
    }
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartNow(ticket) => f
                .debug_tuple("StartNow")
                .field(&ticket.generation)
                .finish(),
            Self::Batched => f.write_str("Batched"),
            Self::Queued { position, notice } => f
                .debug_struct("Queued")
                .field("position", position)
                .field("notice", &notice.as_ref().map(|n| n.id()))
                .finish(),
        }
    }
}

/// Read-only view of one queued item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub order: u64,
    pub submission_id: SubmissionId,
    pub enqueued_at: DateTime<Utc>,
    pub notice_id: Option<NoticeId>,
}
