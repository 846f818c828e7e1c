use crate::error::EditError;
use crate::traits::ChatTransport;
use crate::types::{
    AudioSubmission, CancelRequest, ChatId, CommandMessage, InboundEvent, MediaKind, MessageId,
    SentMessage, cancel_callback_data, parse_cancel_callback,
};
use anyhow::Result;
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use vq_queue::{SubmissionId, UserId};

const TELEGRAM_CHANNEL_ID: &str = "telegram";
const TELEGRAM_LONG_POLL_TIMEOUT_SECS: &str = "30";
const TELEGRAM_ALLOWED_UPDATES: &str = r#"["message","callback_query"]"#;
const TELEGRAM_NOT_MODIFIED: &str = "message is not modified";
const TELEGRAM_NON_TRANSIENT_DELAY: Duration = Duration::from_secs(10);
const TELEGRAM_RETRY_BASE_MS: u64 = 250;
const TELEGRAM_RETRY_MAX_MS: u64 = 30_000;

#[derive(Clone)]
pub struct TelegramAdapter {
    http: reqwest::Client,
    bot_token: String,
    cancel_label: String,
}

impl TelegramAdapter {
    pub fn new(bot_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            cancel_label: "Cancel".to_string(),
        })
    }

    /// Label of the cancel button attached to queue notices.
    pub fn with_cancel_label(mut self, label: impl Into<String>) -> Self {
        self.cancel_label = label.into();
        self
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Ok(Url::parse(&format!(
            "https://api.telegram.org/bot{}/{}",
            self.bot_token, method
        ))?)
    }

    fn cancel_markup(&self, submission_id: SubmissionId) -> serde_json::Value {
        json!({
            "inline_keyboard": [[{
                "text": self.cancel_label,
                "callback_data": cancel_callback_data(submission_id),
            }]]
        })
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = self.api_url(method)?;
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await?;
            return Err(anyhow::anyhow!(
                "telegram {method} failed: status={status} body={text}"
            ));
        }
        let parsed: TelegramResponse = resp.json().await?;
        if !parsed.ok {
            return Err(anyhow::anyhow!(
                "telegram {method} failed: {}",
                parsed.description.unwrap_or_default()
            ));
        }
        Ok(parsed.result)
    }

    async fn send_message(&self, body: serde_json::Value) -> Result<SentMessage> {
        let result = self.call("sendMessage", body).await?;
        let sent: TelegramMessage = serde_json::from_value(result)?;
        let chat = sent
            .chat
            .ok_or_else(|| anyhow::anyhow!("telegram sendMessage result missing chat"))?;
        let message_id = sent
            .message_id
            .ok_or_else(|| anyhow::anyhow!("telegram sendMessage result missing message_id"))?;
        Ok(SentMessage {
            chat_id: ChatId::new(chat.id),
            message_id: MessageId::new(message_id),
        })
    }
}

#[async_trait::async_trait]
impl ChatTransport for TelegramAdapter {
    fn channel_id(&self) -> &str {
        TELEGRAM_CHANNEL_ID
    }

    async fn start(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.run_poll_loop(tx).await {
                tracing::error!(%e, "telegram poll loop exited");
            }
        });
        Ok(())
    }

    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        reply_to: Option<MessageId>,
    ) -> Result<SentMessage> {
        let mut body = json!({
            "chat_id": chat_id.get(),
            "text": text,
        });
        if let Some(reply_to) = reply_to {
            body["reply_to_message_id"] = json!(reply_to.get());
        }
        self.send_message(body).await
    }

    async fn reply_with_cancel(
        &self,
        chat_id: ChatId,
        reply_to: MessageId,
        text: &str,
        submission_id: SubmissionId,
    ) -> Result<SentMessage> {
        self.send_message(json!({
            "chat_id": chat_id.get(),
            "text": text,
            "reply_to_message_id": reply_to.get(),
            "reply_markup": self.cancel_markup(submission_id),
        }))
        .await
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        cancel: Option<SubmissionId>,
    ) -> std::result::Result<(), EditError> {
        let mut body = json!({
            "chat_id": chat_id.get(),
            "message_id": message_id.get(),
            "text": text,
        });
        if let Some(submission_id) = cancel {
            body["reply_markup"] = self.cancel_markup(submission_id);
        }

        let url = self.api_url("editMessageText")?;
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await?;
        Err(classify_edit_failure(status, &text))
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        self.call(
            "deleteMessage",
            json!({
                "chat_id": chat_id.get(),
                "message_id": message_id.get(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        let mut body = json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = json!(text);
        }
        self.call("answerCallbackQuery", body).await?;
        Ok(())
    }
}

impl TelegramAdapter {
    #[tracing::instrument(level = "info", skip_all)]
    async fn run_poll_loop(&self, tx: mpsc::Sender<InboundEvent>) -> Result<()> {
        let mut offset: i64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            let url = self.api_url("getUpdates")?;
            let response = match self
                .http
                .get(url)
                .query(&[
                    ("timeout", TELEGRAM_LONG_POLL_TIMEOUT_SECS),
                    ("offset", &offset.to_string()),
                    ("allowed_updates", TELEGRAM_ALLOWED_UPDATES),
                ])
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %error,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates request failed; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_else(|error| {
                    format!("<failed to read telegram error body: {error}>")
                });
                if is_transient_status(status) {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %status,
                        %body,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates transient failure; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    consecutive_failures = 0;
                    tracing::error!(
                        %status,
                        %body,
                        ?TELEGRAM_NON_TRANSIENT_DELAY,
                        "telegram getUpdates non-transient failure; keeping poll loop alive"
                    );
                    tokio::time::sleep(TELEGRAM_NON_TRANSIENT_DELAY).await;
                }
                continue;
            }

            let parsed = match response.json::<TelegramGetUpdatesResponse>().await {
                Ok(parsed) => parsed,
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %error,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates payload parse failed; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            consecutive_failures = 0;

            let mut updates = parsed.result;
            updates.sort_by_key(|update| update.update_id);
            for update in updates {
                // Advance offset before conversion to avoid poison-update replay loops.
                if update.update_id < offset {
                    continue;
                }
                offset = update.update_id.saturating_add(1);

                let Some(event) = build_inbound_event(&update) else {
                    tracing::debug!(update_id = update.update_id, "ignoring telegram update");
                    continue;
                };
                tx.send(event)
                    .await
                    .map_err(|e| anyhow::anyhow!("telegram inbound queue closed: {e}"))?;
            }
        }
    }
}

fn transient_retry_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis((TELEGRAM_RETRY_BASE_MS * multiplier).min(TELEGRAM_RETRY_MAX_MS))
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn classify_edit_failure(status: StatusCode, body: &str) -> EditError {
    if status == StatusCode::BAD_REQUEST && body.contains(TELEGRAM_NOT_MODIFIED) {
        return EditError::NotModified;
    }
    EditError::Failed(format!("status={status} body={body}"))
}

fn build_inbound_event(update: &TelegramUpdate) -> Option<InboundEvent> {
    if let Some(message) = update.message.as_ref() {
        return build_message_event(message);
    }
    build_cancel_event(update.callback_query.as_ref()?)
}

fn build_message_event(message: &TelegramMessage) -> Option<InboundEvent> {
    let chat = message.chat.as_ref()?;
    let user = message.from.as_ref()?;
    let message_id = MessageId::new(message.message_id?);
    let chat_id = ChatId::new(chat.id);
    let user_id = UserId::new(user.id);

    if let Some((kind, media)) = message.media() {
        return Some(InboundEvent::Audio(AudioSubmission {
            chat_id,
            user_id,
            message_id,
            file_id: media.file_id.clone(),
            kind,
            file_name: media.file_name.clone(),
            received_at: Utc::now(),
        }));
    }

    let (command, args) = parse_command(message.text.as_deref()?)?;
    Some(InboundEvent::Command(CommandMessage {
        chat_id,
        user_id,
        message_id,
        command,
        args,
    }))
}

fn build_cancel_event(callback: &TelegramCallbackQuery) -> Option<InboundEvent> {
    let submission_id = parse_cancel_callback(callback.data.as_deref()?)?;
    let message = callback.message.as_ref()?;
    let chat = message.chat.as_ref()?;
    Some(InboundEvent::CancelQueued(CancelRequest {
        callback_id: callback.id.clone(),
        chat_id: ChatId::new(chat.id),
        user_id: UserId::new(callback.from.id),
        notice_message_id: MessageId::new(message.message_id?),
        submission_id,
    }))
}

/// Split "/start@my_bot payload" into ("start", "payload").
fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.trim().strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = head.split('@').next().unwrap_or(head).trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_ascii_lowercase(), args.to_string()))
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TelegramGetUpdatesResponse {
    #[serde(default)]
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    chat: Option<TelegramChat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    voice: Option<TelegramFile>,
    #[serde(default)]
    audio: Option<TelegramFile>,
    #[serde(default)]
    video: Option<TelegramFile>,
    #[serde(default)]
    video_note: Option<TelegramFile>,
    #[serde(default)]
    document: Option<TelegramFile>,
}

#[derive(Debug, Deserialize)]
struct TelegramCallbackQuery {
    id: String,
    from: TelegramUser,
    #[serde(default)]
    message: Option<TelegramMessage>,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_id: String,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

impl TelegramMessage {
    fn media(&self) -> Option<(MediaKind, &TelegramFile)> {
        if let Some(file) = &self.voice {
            return Some((MediaKind::Voice, file));
        }
        if let Some(file) = &self.audio {
            return Some((MediaKind::Audio, file));
        }
        if let Some(file) = &self.video {
            return Some((MediaKind::Video, file));
        }
        if let Some(file) = &self.video_note {
            return Some((MediaKind::VideoNote, file));
        }
        self.document
            .as_ref()
            .filter(|file| file.is_media_document())
            .map(|file| (MediaKind::Document, file))
    }
}

impl TelegramFile {
    fn is_media_document(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|mime| mime.starts_with("audio/") || mime.starts_with("video/"))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        TelegramUpdate, build_inbound_event, classify_edit_failure, parse_command,
        transient_retry_delay,
    };
    use crate::error::EditError;
    use crate::types::{InboundEvent, MediaKind};
    use reqwest::StatusCode;
    use serde_json::json;

    fn update(value: serde_json::Value) -> TelegramUpdate {
        serde_json::from_value(value).expect("valid telegram update")
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        assert_eq!(transient_retry_delay(1).as_millis(), 250);
        assert_eq!(transient_retry_delay(2).as_millis(), 500);
        assert_eq!(transient_retry_delay(3).as_millis(), 1000);
        assert_eq!(transient_retry_delay(20).as_millis(), 30000);
    }

    #[test]
    fn voice_message_becomes_audio_submission() {
        let event = build_inbound_event(&update(json!({
            "update_id": 10,
            "message": {
                "message_id": 501,
                "from": {"id": 77},
                "chat": {"id": 9001, "type": "private"},
                "voice": {"file_id": "AwACAgIAAxkBAAIB", "mime_type": "audio/ogg"}
            }
        })))
        .expect("voice maps to an event");
        let InboundEvent::Audio(audio) = event else {
            panic!("expected audio submission");
        };
        assert_eq!(audio.kind, MediaKind::Voice);
        assert_eq!(audio.message_id.get(), 501);
        assert_eq!(audio.user_id.get(), 77);
        assert_eq!(audio.chat_id.get(), 9001);
        assert_eq!(audio.file_id, "AwACAgIAAxkBAAIB");
    }

    #[test]
    fn non_media_documents_are_ignored() {
        let event = build_inbound_event(&update(json!({
            "update_id": 11,
            "message": {
                "message_id": 502,
                "from": {"id": 77},
                "chat": {"id": 9001, "type": "private"},
                "document": {"file_id": "doc", "mime_type": "application/pdf"}
            }
        })));
        assert!(event.is_none());
    }

    #[test]
    fn start_command_with_bot_mention_is_parsed() {
        let event = build_inbound_event(&update(json!({
            "update_id": 12,
            "message": {
                "message_id": 503,
                "from": {"id": 77},
                "chat": {"id": 9001, "type": "private"},
                "text": "/Start@voxqueue_bot promo-42"
            }
        })))
        .expect("command maps to an event");
        let InboundEvent::Command(command) = event else {
            panic!("expected command");
        };
        assert_eq!(command.command, "start");
        assert_eq!(command.args, "promo-42");
    }

    #[test]
    fn cancel_button_press_becomes_cancel_request() {
        let event = build_inbound_event(&update(json!({
            "update_id": 13,
            "callback_query": {
                "id": "cbq-1",
                "from": {"id": 77},
                "data": "cancel_queue|501",
                "message": {
                    "message_id": 600,
                    "chat": {"id": 9001, "type": "private"}
                }
            }
        })))
        .expect("cancel maps to an event");
        let InboundEvent::CancelQueued(cancel) = event else {
            panic!("expected cancel request");
        };
        assert_eq!(cancel.callback_id, "cbq-1");
        assert_eq!(cancel.submission_id.get(), 501);
        assert_eq!(cancel.notice_message_id.get(), 600);
    }

    #[test]
    fn plain_text_is_not_an_event() {
        assert_eq!(parse_command("hello there"), None);
        assert_eq!(parse_command("/"), None);
        assert_eq!(
            parse_command("/queue"),
            Some(("queue".to_string(), String::new()))
        );
    }

    #[test]
    fn unchanged_edit_is_classified_as_not_modified() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: message is not modified: specified new message content and reply markup are exactly the same"}"#;
        assert!(matches!(
            classify_edit_failure(StatusCode::BAD_REQUEST, body),
            EditError::NotModified
        ));
        assert!(matches!(
            classify_edit_failure(StatusCode::BAD_REQUEST, "message to edit not found"),
            EditError::Failed(_)
        ));
    }
}
