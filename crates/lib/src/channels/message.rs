//! Inbound and outbound message types exchanged between channels and the gateway.

/// A message from a channel to be classified and optionally dispatched to the flow.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Stable conversation key (Telegram chat id as a string). Also used as the
    /// flow session id so the flow keeps per-conversation memory.
    pub conversation_id: String,
    /// Sender identifier (Telegram user id as a string).
    pub sender_id: String,
    /// Sender handle (Telegram username), when present.
    pub sender_username: Option<String>,
    /// Sender display name (first name, optionally with last name).
    pub sender_name: Option<String>,
    /// Platform message id; replies are addressed to it.
    pub message_id: i64,
    /// Forum topic thread id, when the chat uses topics.
    pub thread_id: Option<i64>,
    pub text: String,
}

/// A reply to deliver through a channel, addressed to the triggering message.
#[derive(Debug, Clone)]
pub struct OutboundReply {
    pub text: String,
    pub reply_to_message_id: Option<i64>,
    /// Render as Markdown. Fixed notices stay plain.
    pub markdown: bool,
}

impl OutboundReply {
    /// Plain-text reply to the given message.
    pub fn plain(text: impl Into<String>, reply_to_message_id: Option<i64>) -> Self {
        Self {
            text: text.into(),
            reply_to_message_id,
            markdown: false,
        }
    }

    /// Answer reply; rendered as Markdown when `markdown` is on.
    pub fn answer(text: impl Into<String>, reply_to_message_id: Option<i64>, markdown: bool) -> Self {
        Self {
            text: text.into(),
            reply_to_message_id,
            markdown,
        }
    }
}
