//! Job processor that hands audio to an external transcription backend.

use crate::config::ProcessorConfig;
use crate::texts;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use vq_channels::{AudioSubmission, ChatTransport, EditError, MediaKind, MessageId};
use vq_queue::{JobProcessor, Notice};

pub struct HttpTranscriber {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    transport: Arc<dyn ChatTransport>,
}

#[derive(Debug, Serialize)]
struct TranscriptionRequest<'a> {
    chat_id: i64,
    user_id: i64,
    message_id: i64,
    file_id: &'a str,
    kind: MediaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_name: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

impl HttpTranscriber {
    pub fn new(cfg: &ProcessorConfig, transport: Arc<dyn ChatTransport>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        let endpoint = Url::parse(cfg.endpoint.trim())
            .with_context(|| format!("invalid processor endpoint {:?}", cfg.endpoint))?;
        Ok(Self {
            http,
            endpoint,
            api_key: cfg.api_key.clone().filter(|key| !key.trim().is_empty()),
            transport,
        })
    }

    /// Turn the queue notice into a progress message, or send a fresh one.
    async fn status_message(
        &self,
        job: &AudioSubmission,
        notice: Option<Notice>,
    ) -> Result<MessageId> {
        if let Some(notice) = notice {
            let message_id = MessageId::new(notice.id().get());
            match self
                .transport
                .edit_text(job.chat_id, message_id, texts::PROCESSING, None)
                .await
            {
                Ok(()) | Err(EditError::NotModified) => return Ok(message_id),
                Err(error) => {
                    tracing::warn!(%error, %message_id, "failed to reuse queue notice");
                }
            }
        }
        let sent = self
            .transport
            .send_text(job.chat_id, texts::PROCESSING, Some(job.message_id))
            .await?;
        Ok(sent.message_id)
    }

    async fn transcribe(&self, job: &AudioSubmission) -> Result<String> {
        let body = TranscriptionRequest {
            chat_id: job.chat_id.get(),
            user_id: job.user_id.get(),
            message_id: job.message_id.get(),
            file_id: &job.file_id,
            kind: job.kind,
            file_name: job.file_name.as_deref(),
        };
        let mut request = self.http.post(self.endpoint.clone()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!(
                "transcription backend failed: status={status} body={text}"
            ));
        }
        let parsed: TranscriptionResponse = resp.json().await?;
        Ok(parsed.text)
    }

    async fn deliver(&self, job: &AudioSubmission, transcript: &str) -> Result<()> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            self.transport
                .send_text(job.chat_id, texts::EMPTY_TRANSCRIPT, Some(job.message_id))
                .await?;
            return Ok(());
        }
        for chunk in texts::split_message(transcript, texts::MESSAGE_CHAR_LIMIT) {
            self.transport
                .send_text(job.chat_id, &chunk, Some(job.message_id))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobProcessor<AudioSubmission> for HttpTranscriber {
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(user_id = %job.user_id, message_id = %job.message_id, kind = ?job.kind)
    )]
    async fn process(&self, job: &AudioSubmission, notice: Option<Notice>) -> Result<()> {
        let status_message = self.status_message(job, notice).await?;
        let started = std::time::Instant::now();

        let outcome = match self.transcribe(job).await {
            Ok(transcript) => self.deliver(job, &transcript).await,
            Err(error) => Err(error),
        };

        if let Err(error) = self
            .transport
            .delete_message(job.chat_id, status_message)
            .await
        {
            tracing::warn!(%error, "failed to delete progress message");
        }
        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "transcription finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpTranscriber, TranscriptionRequest};
    use crate::config::ProcessorConfig;
    use crate::notice::ChatAnnouncer;
    use crate::testing::{FakeTransport, Sent};
    use crate::texts;
    use std::sync::Arc;
    use vq_channels::{AudioSubmission, ChatId, MediaKind, MessageId};
    use vq_queue::{Announcer, QueuePosition, UserId};

    fn submission() -> AudioSubmission {
        AudioSubmission {
            chat_id: ChatId::new(5),
            user_id: UserId::new(9),
            message_id: MessageId::new(42),
            file_id: "voice-file".to_string(),
            kind: MediaKind::Voice,
            file_name: None,
            received_at: chrono::Utc::now(),
        }
    }

    fn transcriber(transport: Arc<FakeTransport>) -> HttpTranscriber {
        let cfg = ProcessorConfig {
            endpoint: "http://127.0.0.1:9/transcribe".to_string(),
            api_key: Some("  ".to_string()),
            timeout_secs: 5,
        };
        HttpTranscriber::new(&cfg, transport).expect("transcriber")
    }

    #[test]
    fn request_body_omits_missing_file_name() {
        let job = submission();
        let body = TranscriptionRequest {
            chat_id: job.chat_id.get(),
            user_id: job.user_id.get(),
            message_id: job.message_id.get(),
            file_id: &job.file_id,
            kind: job.kind,
            file_name: None,
        };
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value["kind"], "voice");
        assert_eq!(value["message_id"], 42);
        assert!(value.get("file_name").is_none());
    }

    #[test]
    fn blank_api_key_is_dropped() {
        let t = transcriber(Arc::new(FakeTransport::default()));
        assert!(t.api_key.is_none());
    }

    #[tokio::test]
    async fn queue_notice_becomes_the_progress_message() {
        let transport = Arc::new(FakeTransport::default());
        let t = transcriber(transport.clone());
        let job = submission();
        let notice = ChatAnnouncer::new(transport.clone())
            .announce(&job, QueuePosition::at_index(0, true))
            .await
            .expect("announce");
        let notice_id = notice.id().get();

        let status = t.status_message(&job, Some(notice)).await.expect("status");
        assert_eq!(status.get(), notice_id);
        assert_eq!(
            transport.edits(),
            vec![(notice_id, texts::PROCESSING.to_string(), None)]
        );
    }

    #[tokio::test]
    async fn job_without_notice_gets_a_fresh_progress_reply() {
        let transport = Arc::new(FakeTransport::default());
        let t = transcriber(transport.clone());
        let status = t.status_message(&submission(), None).await.expect("status");

        assert_eq!(
            transport.sent(),
            vec![Sent::Text {
                message_id: status.get(),
                text: texts::PROCESSING.to_string(),
                reply_to: Some(42),
            }]
        );
    }

    #[tokio::test]
    async fn empty_transcript_sends_placeholder() {
        let transport = Arc::new(FakeTransport::default());
        let t = transcriber(transport.clone());
        t.deliver(&submission(), "  \n").await.expect("deliver");
        assert_eq!(transport.texts(), vec![texts::EMPTY_TRANSCRIPT.to_string()]);
    }

    #[tokio::test]
    async fn long_transcript_is_sent_in_chunks() {
        let transport = Arc::new(FakeTransport::default());
        let t = transcriber(transport.clone());
        let transcript = "a".repeat(texts::MESSAGE_CHAR_LIMIT + 10);
        t.deliver(&submission(), &transcript).await.expect("deliver");

        let sent = transport.texts();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].chars().count(), texts::MESSAGE_CHAR_LIMIT);
        assert_eq!(sent[1].chars().count(), 10);
    }
}
