//! Per-user drain loop.

use crate::state::{QueueItem, Shared, UserSlot};
use crate::traits::Notice;
use crate::types::{QueuePosition, QueuedJob, UserId};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tracing::instrument(level = "debug", skip_all, fields(user_id = %user_id))]
pub(crate) async fn run_worker<J: QueuedJob>(
    shared: Arc<Shared<J>>,
    user_id: UserId,
    slot: Arc<UserSlot<J>>,
    token: CancellationToken,
) {
    tracing::debug!("queue worker started");
    loop {
        let (item, pending) = {
            let mut state = slot.state.lock().await;
            if token.is_cancelled() {
                tracing::debug!("queue worker cancelled");
                return;
            }
            let Some(item) = state.items.pop_front() else {
                state.is_processing = false;
                state.worker = None;
                slot.publish(&state);
                tracing::debug!("queue drained; worker exiting");
                return;
            };
            state.is_processing = true;
            slot.publish(&state);
            (item, state.pending_notices())
        };

        update_notices(user_id, pending).await;
        process_item(&shared, user_id, item).await;
    }
}

async fn process_item<J: QueuedJob>(shared: &Shared<J>, user_id: UserId, item: QueueItem<J>) {
    let QueueItem {
        job,
        announcer,
        notice,
        order,
        ..
    } = item;
    let submission_id = job.submission_id();

    let outcome = AssertUnwindSafe(shared.processor.process(&job, notice))
        .catch_unwind()
        .await;
    let failure = match outcome {
        Ok(Ok(())) => {
            tracing::info!(%submission_id, order, "processed queued job");
            return;
        }
        Ok(Err(error)) => format!("{error:#}"),
        Err(payload) => format!("panic: {}", panic_payload_to_string(payload.as_ref())),
    };

    tracing::error!(%submission_id, order, error = %failure, "queued job failed");
    if let Err(error) = announcer.notify_failure(&job).await {
        tracing::warn!(%user_id, %submission_id, %error, "failed to send failure notice");
    }
}

/// Push fresh positions to the given notices. "Not modified" is success.
pub(crate) async fn update_notices(user_id: UserId, pending: Vec<(Notice, QueuePosition)>) {
    for (notice, position) in pending {
        match notice.update(position).await {
            Ok(()) => {}
            Err(error) if error.is_benign() => {}
            Err(error) => {
                tracing::warn!(
                    %user_id,
                    notice_id = %notice.id(),
                    %position,
                    %error,
                    "failed to update queue notice"
                );
            }
        }
    }
}

fn panic_payload_to_string(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
