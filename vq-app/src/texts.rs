//! User-facing texts.

use vq_queue::QueuePosition;

pub const CANCEL_BUTTON: &str = "Cancel";
pub const PROCESSING: &str = "Transcribing your audio, please wait...";
pub const SOMETHING_WENT_WRONG: &str =
    "Something went wrong while processing your audio. Please try again.";
pub const EMPTY_TRANSCRIPT: &str = "No speech was recognized in this audio.";
pub const QUEUE_CLEARED: &str = "Your audio queue was cleared.";
pub const QUEUE_CANCELLED: &str = "Removed from the queue.";
pub const NOT_QUEUED: &str = "This audio is no longer waiting in the queue.";
pub const WELCOME: &str =
    "Send me a voice message, an audio file or a video and I will transcribe it.";
pub const HELP: &str = "Send audio to transcribe it.\n/queue shows your queue\n/reset clears it";

/// Telegram rejects messages longer than this many characters.
pub const MESSAGE_CHAR_LIMIT: usize = 4096;

pub fn queue_position(position: QueuePosition) -> String {
    if position.get() <= 2 {
        format!(
            "Your audio is next in line (position {position}). It will start as soon as the current one finishes."
        )
    } else {
        format!("Your audio was added to the queue at position {position}.")
    }
}

pub fn queue_status(queued: usize, busy: bool) -> String {
    match (queued, busy) {
        (0, false) => "Your queue is empty.".to_string(),
        (0, true) => "One audio is being transcribed, nothing is waiting.".to_string(),
        (n, true) => format!("One audio is being transcribed, {n} waiting."),
        (n, false) => format!("{n} audio waiting in the queue."),
    }
}

/// Split `text` into chunks of at most `limit` characters, preferring line
/// breaks as cut points.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len <= limit {
            current.push_str(line);
            current_len += line_len;
            continue;
        }
        for ch in line.chars() {
            if current_len == limit {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += 1;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
