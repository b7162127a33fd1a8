use crate::domain::{ChatId, MessageRef};

/// Platform-agnostic incoming update.
///
/// Platform-specific fields stay in the adapter crate.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Message(TextMessage),
    Callback(CallbackQuery),
    /// Anything the bot does not react to (edits, joins, media without text...).
    Other,
}

#[derive(Clone, Debug)]
pub struct TextMessage {
    pub chat_id: ChatId,
    pub text: String,
}

/// A button press.
#[derive(Clone, Debug)]
pub struct CallbackQuery {
    /// Acknowledgment token for the press itself.
    pub callback_id: String,
    /// Correlation token carried by the pressed button.
    pub data: String,
    /// Message the button lives on, when the platform still exposes it.
    pub message: Option<MessageRef>,
}

/// How outgoing text is interpreted by the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Formatting {
    Plain,
    Html,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub activation_url: String,
    pub correlation_token: String,
}

/// Inline keyboard, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// Single-row, single-button layout.
    pub fn single(button: InlineButton) -> Self {
        Self {
            rows: vec![vec![button]],
        }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// Reply to a button press.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackAnswer {
    pub text: String,
    /// `true` asks for a blocking alert instead of a small toast.
    pub show_alert: bool,
    /// Seconds the client may cache this answer.
    pub cache_time: u32,
}

impl CallbackAnswer {
    /// Small non-blocking popup, never cached.
    pub fn toast(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            show_alert: false,
            cache_time: 0,
        }
    }
}
