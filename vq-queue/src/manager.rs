//! Per-user job queue manager.
//!
//! Each user gets a FIFO, a processing flag, a lock and a monotonic order
//! counter. Submissions that arrive while a job is running are first captured
//! by a short collection window so that a burst of uploads is announced once,
//! in submission-id order, instead of one notice per arrival.

use crate::config::CollectionWindowConfig;
use crate::error::Result;
use crate::state::{CollectionWindow, QueueItem, Shared, TaskSlot};
use crate::traits::{Announcer, JobProcessor};
use crate::types::{
    Admission, QueuePosition, QueueSnapshot, QueuedJob, StartTicket, SubmissionId, UserId,
};
use crate::{window, worker};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct QueueManager<J: QueuedJob> {
    inner: Arc<Shared<J>>,
}

impl<J: QueuedJob> Clone for QueueManager<J> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J: QueuedJob> QueueManager<J> {
    pub fn new(config: CollectionWindowConfig, processor: Arc<dyn JobProcessor<J>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Shared::new(config, processor)),
        })
    }

    pub fn config(&self) -> &CollectionWindowConfig {
        &self.inner.config
    }

    /// Admit a submission.
    ///
    /// An idle user starts immediately; the caller must then run the job and
    /// call [`Self::finish_processing`]. Otherwise the job is captured by a
    /// collection window or appended to the FIFO.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(user_id = %user_id, submission_id = %job.submission_id())
    )]
    pub async fn submit(
        &self,
        user_id: UserId,
        job: J,
        announcer: Arc<dyn Announcer<J>>,
    ) -> Admission {
        let slot = self.inner.slot(user_id);
        let mut state = slot.state.lock().await;

        // Every admission consumes an order number and a flush assigns fresh
        // ones, so orders are increasing but not contiguous.
        let order = state.next_order();
        let busy = state.is_processing;

        // A window that is still collecting keeps taking arrivals even if the
        // running job finished in the meantime; otherwise a later submission
        // could overtake the buffered ones.
        if let Some(window) = state.window.as_mut() {
            window.capture(job, announcer);
            tracing::debug!(order, buffered = window.buffer.len(), "added to collection window");
            return Admission::Batched;
        }

        if !busy && state.items.is_empty() {
            state.is_processing = true;
            slot.publish(&state);
            tracing::debug!(order, "started processing (not queued)");
            return Admission::StartNow(StartTicket {
                generation: state.generation,
            });
        }

        if busy {
            let token = CancellationToken::new();
            let handle = tokio::spawn(window::run_collection_window(
                Arc::clone(&self.inner),
                user_id,
                Arc::clone(&slot),
                token.clone(),
            ));
            let mut window = CollectionWindow {
                buffer: Vec::new(),
                last_capture: Instant::now(),
                task: TaskSlot { token, handle },
            };
            window.capture(job, announcer);
            state.window = Some(window);
            tracing::info!(order, "started collection window");
            return Admission::Batched;
        }

        let position = QueuePosition::at_index(state.items.len(), busy);
        let notice = match announcer.announce(&job, position).await {
            Ok(notice) => Some(notice),
            Err(error) => {
                tracing::error!(%error, "failed to announce queue position");
                None
            }
        };
        state.items.push_back(QueueItem {
            job,
            announcer,
            notice: notice.clone(),
            order,
            enqueued_at: Utc::now(),
        });
        slot.publish(&state);
        tracing::info!(order, %position, queue_len = state.items.len(), "added to queue");

        self.inner.ensure_worker(user_id, &slot, &mut state);
        Admission::Queued { position, notice }
    }

    /// Report that a job started with [`Admission::StartNow`] has completed,
    /// successfully or not. Starts the worker if jobs are waiting.
    ///
    /// A ticket issued before the last [`Self::clear`] is ignored, so a job
    /// that outlived a reset cannot release the flag of a newer one.
    pub async fn finish_processing(&self, user_id: UserId, ticket: StartTicket) {
        let Some(slot) = self.inner.existing(user_id) else {
            tracing::debug!(%user_id, "finish_processing for unknown user; ignoring");
            return;
        };
        let mut state = slot.state.lock().await;
        if ticket.generation != state.generation {
            tracing::debug!(
                %user_id,
                ticket = ticket.generation,
                current = state.generation,
                "stale finish_processing after clear; ignoring"
            );
            return;
        }
        if state.worker.as_ref().is_some_and(TaskSlot::is_live) {
            tracing::debug!(%user_id, "queue worker owns the processing flag; ignoring");
            return;
        }
        state.is_processing = false;
        slot.publish(&state);
        tracing::info!(%user_id, queue_len = state.items.len(), "finished processing");

        self.inner.ensure_worker(user_id, &slot, &mut state);
    }

    /// Number of queued jobs. Advisory, does not take the lock.
    pub fn size(&self, user_id: UserId) -> usize {
        self.inner.existing(user_id).map_or(0, |slot| slot.queued())
    }

    /// Whether a job is running for the user. Advisory, does not take the lock.
    pub fn is_busy(&self, user_id: UserId) -> bool {
        self.inner
            .existing(user_id)
            .is_some_and(|slot| slot.processing())
    }

    /// Remove the first queued job with the given submission id, keeping the
    /// relative order of the rest.
    pub async fn remove(&self, user_id: UserId, token: SubmissionId) -> bool {
        let Some(slot) = self.inner.existing(user_id) else {
            tracing::debug!(%user_id, "no queue found");
            return false;
        };
        let mut state = slot.state.lock().await;
        let Some(index) = state
            .items
            .iter()
            .position(|item| item.job.submission_id() == token)
        else {
            tracing::debug!(%user_id, submission_id = %token, "submission not queued");
            return false;
        };
        state.items.remove(index);
        slot.publish(&state);
        tracing::info!(%user_id, submission_id = %token, "removed from queue");
        true
    }

    pub async fn peek_all(&self, user_id: UserId) -> Vec<QueueSnapshot> {
        match self.inner.existing(user_id) {
            Some(slot) => slot.state.lock().await.snapshot(),
            None => Vec::new(),
        }
    }

    /// Re-send positions to every queued notice. Returns how many were touched.
    pub async fn refresh_notices(&self, user_id: UserId) -> usize {
        let Some(slot) = self.inner.existing(user_id) else {
            return 0;
        };
        let pending = slot.state.lock().await.pending_notices();
        let count = pending.len();
        worker::update_notices(user_id, pending).await;
        count
    }

    /// Drop everything queued or buffered for the user and cancel its
    /// background tasks. A job already inside the processor is left to finish.
    /// Returns whether anything was discarded.
    pub async fn clear(&self, user_id: UserId) -> bool {
        let Some(slot) = self.inner.existing(user_id) else {
            return false;
        };
        let mut state = slot.state.lock().await;
        let buffered = state.window.as_ref().map_or(0, |window| window.buffer.len());
        let discarded = state.items.len() + buffered;

        state.items.clear();
        if let Some(worker) = state.worker.take() {
            drop(worker.cancel());
        }
        if let Some(window) = state.window.take() {
            drop(window.task.cancel());
        }
        state.is_processing = false;
        state.message_counter = 0;
        state.generation += 1;
        slot.publish(&state);

        tracing::info!(%user_id, discarded, "cleared queue");
        discarded > 0
    }

    /// Cancel every user's background tasks and wait for them to exit.
    pub async fn shutdown(&self) {
        let mut handles = Vec::new();
        for (_, slot) in self.inner.all_slots() {
            let mut state = slot.state.lock().await;
            if let Some(worker) = state.worker.take() {
                handles.push(worker.cancel());
            }
            if let Some(window) = state.window.take() {
                handles.push(window.task.cancel());
            }
        }
        for handle in handles {
            match tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(%error, "queue task join failed");
                }
                Err(_) => {
                    tracing::warn!("timed out waiting for queue task shutdown");
                }
            }
        }
    }
}
