//! Process wiring: config, Telegram adapter, queue, gateway, shutdown.

use crate::config::VoxQueueConfig;
use crate::gateway::Gateway;
use crate::notice::ChatAnnouncer;
use crate::processor::HttpTranscriber;
use crate::texts;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vq_channels::{AudioSubmission, ChatTransport, TelegramAdapter};
use vq_queue::{Announcer, JobProcessor, QueueManager};

const INBOUND_BUFFER: usize = 256;

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = VoxQueueConfig::load_with_path(config_path).await?;
    tracing::info!(
        config_path = %path.display(),
        processor_endpoint = %cfg.processor.endpoint,
        initial_delay_ms = cfg.queue.initial_delay_ms,
        max_total_delay_ms = cfg.queue.max_total_delay_ms,
        quiet_period_ms = cfg.queue.quiet_period_ms,
        "voxqueue starting"
    );

    let transport: Arc<dyn ChatTransport> = Arc::new(
        TelegramAdapter::new(&cfg.telegram.bot_token)?.with_cancel_label(texts::CANCEL_BUTTON),
    );
    let processor: Arc<dyn JobProcessor<AudioSubmission>> =
        Arc::new(HttpTranscriber::new(&cfg.processor, Arc::clone(&transport))?);
    let queue = QueueManager::new(cfg.queue, Arc::clone(&processor))?;
    let announcer: Arc<dyn Announcer<AudioSubmission>> =
        Arc::new(ChatAnnouncer::new(Arc::clone(&transport)));

    let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
    transport.start(tx).await?;
    tracing::info!(channel = transport.channel_id(), "channel started");

    let gateway = Arc::new(Gateway::new(
        Arc::clone(&transport),
        queue.clone(),
        processor,
        announcer,
        rx,
    ));
    let shutdown = CancellationToken::new();
    let gateway_handle = gateway.start(shutdown.child_token());

    shutdown_signal(shutdown.clone()).await;

    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }
    queue.shutdown().await;
    tracing::info!("queue shutdown completed");
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = VoxQueueConfig::load_with_path(config_path).await?;
    tracing::info!(
        config_path = %path.display(),
        processor_endpoint = %cfg.processor.endpoint,
        processor_auth = cfg.processor.api_key.is_some(),
        processor_timeout_secs = cfg.processor.timeout_secs,
        initial_delay_ms = cfg.queue.initial_delay_ms,
        max_total_delay_ms = cfg.queue.max_total_delay_ms,
        quiet_period_ms = cfg.queue.quiet_period_ms,
        "config ok"
    );
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
