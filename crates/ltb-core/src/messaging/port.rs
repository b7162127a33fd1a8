use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::{CallbackAnswer, Formatting, InlineKeyboard},
    Result,
};

/// Outbound chat-platform port.
///
/// Every call is a single network round trip; implementations must not retry
/// edits or answers in a way that could reorder them.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
        formatting: Formatting,
    ) -> Result<MessageRef>;

    async fn edit_message(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
        formatting: Formatting,
    ) -> Result<()>;

    async fn answer_callback(&self, callback_id: &str, answer: &CallbackAnswer) -> Result<()>;
}
