//! Per-user queue state and the task slots that drive it.

use crate::config::CollectionWindowConfig;
use crate::traits::{Announcer, JobProcessor, Notice};
use crate::types::{QueuePosition, QueueSnapshot, QueuedJob, UserId};
use crate::worker;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) struct Shared<J: QueuedJob> {
    pub(crate) config: CollectionWindowConfig,
    pub(crate) processor: Arc<dyn JobProcessor<J>>,
    users: DashMap<UserId, Arc<UserSlot<J>>>,
}

impl<J: QueuedJob> Shared<J> {
    pub(crate) fn new(config: CollectionWindowConfig, processor: Arc<dyn JobProcessor<J>>) -> Self {
        Self {
            config,
            processor,
            users: DashMap::new(),
        }
    }

    /// Slot for `user_id`, created on first use.
    pub(crate) fn slot(&self, user_id: UserId) -> Arc<UserSlot<J>> {
        self.users
            .entry(user_id)
            .or_insert_with(|| Arc::new(UserSlot::new()))
            .value()
            .clone()
    }

    pub(crate) fn existing(&self, user_id: UserId) -> Option<Arc<UserSlot<J>>> {
        self.users.get(&user_id).map(|entry| entry.value().clone())
    }

    pub(crate) fn all_slots(&self) -> Vec<(UserId, Arc<UserSlot<J>>)> {
        self.users
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }

    /// Start a worker when the FIFO has items, nothing is running and no
    /// worker is alive. Must be called with the user's lock held.
    pub(crate) fn ensure_worker(
        self: &Arc<Self>,
        user_id: UserId,
        slot: &Arc<UserSlot<J>>,
        state: &mut UserState<J>,
    ) {
        if state.items.is_empty() || state.is_processing {
            return;
        }
        if state.worker.as_ref().is_some_and(TaskSlot::is_live) {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(worker::run_worker(
            Arc::clone(self),
            user_id,
            Arc::clone(slot),
            token.clone(),
        ));
        tracing::debug!(%user_id, queue_len = state.items.len(), "queue worker spawned");
        state.worker = Some(TaskSlot { token, handle });
    }
}

/// Everything owned for one user. `state` is the per-user lock.
pub(crate) struct UserSlot<J> {
    pub(crate) state: Mutex<UserState<J>>,
    queued: AtomicUsize,
    processing: AtomicBool,
}

impl<J> UserSlot<J> {
    fn new() -> Self {
        Self {
            state: Mutex::new(UserState::default()),
            queued: AtomicUsize::new(0),
            processing: AtomicBool::new(false),
        }
    }

    /// Mirror the locked state into the advisory counters.
    pub(crate) fn publish(&self, state: &UserState<J>) {
        self.queued.store(state.items.len(), Ordering::Release);
        self.processing.store(state.is_processing, Ordering::Release);
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub(crate) fn processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }
}

pub(crate) struct UserState<J> {
    pub(crate) items: VecDeque<QueueItem<J>>,
    pub(crate) is_processing: bool,
    pub(crate) message_counter: u64,
    /// Bumped by `clear`; start tickets from an older generation are stale.
    pub(crate) generation: u64,
    pub(crate) window: Option<CollectionWindow<J>>,
    pub(crate) worker: Option<TaskSlot>,
}

impl<J> Default for UserState<J> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            is_processing: false,
            message_counter: 0,
            generation: 0,
            window: None,
            worker: None,
        }
    }
}

impl<J: QueuedJob> UserState<J> {
    pub(crate) fn next_order(&mut self) -> u64 {
        self.message_counter += 1;
        self.message_counter
    }

    /// Notices of queued items paired with the position they should show now.
    pub(crate) fn pending_notices(&self) -> Vec<(Notice, QueuePosition)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| {
                item.notice.as_ref().map(|notice| {
                    (
                        Arc::clone(notice),
                        QueuePosition::at_index(index, self.is_processing),
                    )
                })
            })
            .collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<QueueSnapshot> {
        self.items
            .iter()
            .map(|item| QueueSnapshot {
                order: item.order,
                submission_id: item.job.submission_id(),
                enqueued_at: item.enqueued_at,
                notice_id: item.notice.as_ref().map(|notice| notice.id()),
            })
            .collect()
    }
}

pub(crate) struct QueueItem<J> {
    pub(crate) job: J,
    pub(crate) announcer: Arc<dyn Announcer<J>>,
    pub(crate) notice: Option<Notice>,
    pub(crate) order: u64,
    pub(crate) enqueued_at: DateTime<Utc>,
}

/// Submissions captured while a collection window is open.
pub(crate) struct CollectionWindow<J> {
    pub(crate) buffer: Vec<BufferedJob<J>>,
    pub(crate) last_capture: Instant,
    pub(crate) task: TaskSlot,
}

impl<J> CollectionWindow<J> {
    pub(crate) fn capture(&mut self, job: J, announcer: Arc<dyn Announcer<J>>) {
        self.buffer.push(BufferedJob {
            job,
            announcer,
            captured_at: Utc::now(),
        });
        self.last_capture = Instant::now();
    }
}

pub(crate) struct BufferedJob<J> {
    pub(crate) job: J,
    pub(crate) announcer: Arc<dyn Announcer<J>>,
    pub(crate) captured_at: DateTime<Utc>,
}

/// An owned background task: cancelled cooperatively through its token.
pub(crate) struct TaskSlot {
    pub(crate) token: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
}

impl TaskSlot {
    pub(crate) fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }

    pub(crate) fn cancel(self) -> JoinHandle<()> {
        self.token.cancel();
        self.handle
    }
}
