//! Collection window: debounces near-simultaneous submissions, then moves them
//! into the FIFO sorted by submission id.

use crate::state::{QueueItem, Shared, UserSlot};
use crate::types::{QueuePosition, QueuedJob, UserId};
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) async fn run_collection_window<J: QueuedJob>(
    shared: Arc<Shared<J>>,
    user_id: UserId,
    slot: Arc<UserSlot<J>>,
    token: CancellationToken,
) {
    let cfg = shared.config;
    let opened_at = Instant::now();

    loop {
        let remaining = cfg.max_total_delay().saturating_sub(opened_at.elapsed());
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::debug!(%user_id, "collection window cancelled");
                return;
            }
            () = tokio::time::sleep(cfg.initial_delay().min(remaining)) => {}
        }

        if opened_at.elapsed() >= cfg.max_total_delay() {
            break;
        }

        let last_capture = {
            let state = slot.state.lock().await;
            if token.is_cancelled() {
                return;
            }
            match state.window.as_ref() {
                Some(window) => window.last_capture,
                None => return,
            }
        };
        if last_capture.elapsed() >= cfg.quiet_period() {
            break;
        }
    }

    flush_collection_window(&shared, user_id, &slot, &token).await;
}

/// Move the buffered submissions into the FIFO and announce each one.
///
/// The window is detached from the user state before anything else happens,
/// so a failing announcer can never leave it open.
pub(crate) async fn flush_collection_window<J: QueuedJob>(
    shared: &Arc<Shared<J>>,
    user_id: UserId,
    slot: &Arc<UserSlot<J>>,
    token: &CancellationToken,
) {
    let mut state = slot.state.lock().await;
    if token.is_cancelled() {
        return;
    }
    let Some(window) = state.window.take() else {
        tracing::debug!(%user_id, "flush without an open collection window; ignoring");
        return;
    };

    let mut buffer = window.buffer;
    buffer.sort_by_key(|buffered| buffered.job.submission_id());
    tracing::info!(%user_id, collected = buffer.len(), "flushing collection window");

    for buffered in buffer {
        let order = state.next_order();
        let position = QueuePosition::at_index(state.items.len(), state.is_processing);
        let submission_id = buffered.job.submission_id();

        let notice = match buffered.announcer.announce(&buffered.job, position).await {
            Ok(notice) => Some(notice),
            Err(error) => {
                tracing::error!(
                    %user_id,
                    %submission_id,
                    %error,
                    "failed to announce queue position"
                );
                None
            }
        };

        state.items.push_back(QueueItem {
            job: buffered.job,
            announcer: buffered.announcer,
            notice,
            order,
            enqueued_at: buffered.captured_at,
        });
        slot.publish(&state);
        tracing::info!(
            %user_id,
            %submission_id,
            order,
            %position,
            "collected submission queued"
        );
    }

    shared.ensure_worker(user_id, slot, &mut state);
}
