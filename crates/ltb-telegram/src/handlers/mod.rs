//! Telegram update handlers.
//!
//! Each handler converts a teloxide update into a core [`IncomingUpdate`] and hands it to
//! the [`LinkBot`](ltb_core::bot::LinkBot). Failures are logged by the core and never
//! surfaced to teloxide, so Telegram always gets its update acknowledged.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use ltb_core::{
    domain::{ChatId, MessageId, MessageRef},
    messaging::types::{self, IncomingUpdate, TextMessage},
};

use crate::router::AppState;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    state.link_bot.handle_update(from_callback(&q)).await;
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    state.link_bot.handle_update(from_message(&msg)).await;
    Ok(())
}

/// Text messages become command candidates; everything else is ignored.
pub fn from_message(msg: &Message) -> IncomingUpdate {
    match msg.text() {
        Some(text) => IncomingUpdate::Message(TextMessage {
            chat_id: ChatId(msg.chat.id.0),
            text: text.to_string(),
        }),
        None => IncomingUpdate::Other,
    }
}

/// Button presses carry the link id as callback data. Presses without data (games) are
/// ignored.
pub fn from_callback(q: &CallbackQuery) -> IncomingUpdate {
    let Some(data) = q.data.clone() else {
        return IncomingUpdate::Other;
    };

    IncomingUpdate::Callback(types::CallbackQuery {
        callback_id: q.id.clone(),
        data,
        message: q.message.as_ref().map(|m| MessageRef {
            chat_id: ChatId(m.chat.id.0),
            message_id: MessageId(m.id.0),
        }),
    })
}
