//! Dispatch layer: routes inbound chat events into the per-user queue.

use crate::texts;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use vq_channels::{AudioSubmission, CancelRequest, ChatTransport, CommandMessage, InboundEvent};
use vq_queue::{Admission, Announcer, JobProcessor, QueueManager, StartTicket};

pub struct Gateway {
    transport: Arc<dyn ChatTransport>,
    queue: QueueManager<AudioSubmission>,
    processor: Arc<dyn JobProcessor<AudioSubmission>>,
    announcer: Arc<dyn Announcer<AudioSubmission>>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundEvent>>>,
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        queue: QueueManager<AudioSubmission>,
        processor: Arc<dyn JobProcessor<AudioSubmission>>,
        announcer: Arc<dyn Announcer<AudioSubmission>>,
        inbound_rx: mpsc::Receiver<InboundEvent>,
    ) -> Self {
        Self {
            transport,
            queue,
            processor,
            announcer,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop(shutdown).await;
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self, shutdown: CancellationToken) {
        loop {
            let event = {
                let mut rx = self.inbound_rx.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("gateway stopping");
                        return;
                    }
                    event = rx.recv() => event,
                }
            };
            let Some(event) = event else {
                tracing::info!("inbound channel closed; gateway stopping");
                return;
            };

            let user_id = event.user_id();
            if let Err(e) = self.handle_event(event).await {
                tracing::warn!(%user_id, error = %e, "handle_event failed");
            }
        }
    }

    pub(crate) async fn handle_event(&self, event: InboundEvent) -> Result<()> {
        match event {
            InboundEvent::Audio(audio) => {
                self.handle_audio(audio).await;
                Ok(())
            }
            InboundEvent::Command(command) => self.handle_command(command).await,
            InboundEvent::CancelQueued(cancel) => self.handle_cancel(cancel).await,
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(user_id = %audio.user_id, message_id = %audio.message_id)
    )]
    async fn handle_audio(&self, audio: AudioSubmission) {
        let user_id = audio.user_id;
        let admission = self
            .queue
            .submit(user_id, audio.clone(), Arc::clone(&self.announcer))
            .await;
        match admission {
            Admission::StartNow(ticket) => {
                let queue = self.queue.clone();
                let processor = Arc::clone(&self.processor);
                let announcer = Arc::clone(&self.announcer);
                tokio::spawn(run_now(queue, processor, announcer, audio, ticket));
            }
            Admission::Batched => tracing::debug!("audio batched"),
            Admission::Queued { position, .. } => tracing::debug!(%position, "audio queued"),
        }
    }

    async fn handle_command(&self, command: CommandMessage) -> Result<()> {
        match command.command.as_str() {
            "start" | "reset" => {
                if self.queue.clear(command.user_id).await {
                    self.reply(&command, texts::QUEUE_CLEARED).await?;
                }
                self.reply(&command, texts::WELCOME).await
            }
            "queue" => {
                let status = texts::queue_status(
                    self.queue.size(command.user_id),
                    self.queue.is_busy(command.user_id),
                );
                self.reply(&command, &status).await
            }
            "help" => self.reply(&command, texts::HELP).await,
            other => {
                tracing::debug!(command = other, "ignoring unknown command");
                Ok(())
            }
        }
    }

    async fn reply(&self, command: &CommandMessage, text: &str) -> Result<()> {
        self.transport
            .send_text(command.chat_id, text, Some(command.message_id))
            .await?;
        Ok(())
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(user_id = %cancel.user_id, submission_id = %cancel.submission_id)
    )]
    async fn handle_cancel(&self, cancel: CancelRequest) -> Result<()> {
        if !self.queue.remove(cancel.user_id, cancel.submission_id).await {
            return self
                .transport
                .answer_callback(&cancel.callback_id, Some(texts::NOT_QUEUED))
                .await;
        }

        let refreshed = self.queue.refresh_notices(cancel.user_id).await;
        tracing::info!(refreshed, "cancelled queued audio");
        if let Err(e) = self
            .transport
            .delete_message(cancel.chat_id, cancel.notice_message_id)
            .await
        {
            tracing::warn!(error = %e, "failed to delete cancelled notice");
        }
        self.transport
            .answer_callback(&cancel.callback_id, Some(texts::QUEUE_CANCELLED))
            .await
    }
}

/// Run a start-now job and hand the processing flag back to the queue.
async fn run_now(
    queue: QueueManager<AudioSubmission>,
    processor: Arc<dyn JobProcessor<AudioSubmission>>,
    announcer: Arc<dyn Announcer<AudioSubmission>>,
    audio: AudioSubmission,
    ticket: StartTicket,
) {
    let user_id = audio.user_id;
    let job = audio.clone();
    let outcome = tokio::spawn(async move { processor.process(&job, None).await }).await;
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(e) => Some(format!("processor task failed: {e}")),
    };
    if let Some(error) = failure {
        tracing::error!(%user_id, message_id = %audio.message_id, %error, "audio processing failed");
        if let Err(e) = announcer.notify_failure(&audio).await {
            tracing::warn!(%user_id, error = %e, "failed to send failure notice");
        }
    }
    queue.finish_processing(user_id, ticket).await;
}
