//! Telegram adapter (teloxide).
//!
//! This crate implements the `ltb-core` MessagingPort over the Telegram Bot API and
//! feeds incoming updates to the core [`LinkBot`](ltb_core::bot::LinkBot).

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode},
    ApiError, RequestError,
};

use tokio::time::sleep;
use tracing::debug;

pub mod handlers;
pub mod router;

use ltb_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{CallbackAnswer, Formatting, InlineKeyboard},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn map_err(e: RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    /// Run a request, retrying once when Telegram asks us to back off.
    ///
    /// Used for sends and answers only.
    async fn with_retry<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    sleep(d).await;
                }
                Err(other) => return Err(other),
            }
        }
    }
}

fn parse_mode(formatting: Formatting) -> Option<ParseMode> {
    match formatting {
        Formatting::Plain => None,
        Formatting::Html => Some(ParseMode::Html),
    }
}

/// Render a core keyboard as Telegram inline markup.
///
/// A Telegram button carries either a URL or callback data, never both. Counting needs
/// the press event, so buttons become callback buttons; the URL stays reachable through
/// the message text.
pub fn to_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.correlation_token.clone()))
                .collect()
        })
        .collect();
    InlineKeyboardMarkup::new(rows)
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
        formatting: Formatting,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(to_markup);
        let msg = self
            .with_retry(|| {
                let mut req = self.bot.send_message(Self::tg_chat(chat_id), text.to_string());
                if let Some(mode) = parse_mode(formatting) {
                    req = req.parse_mode(mode);
                }
                if let Some(markup) = &markup {
                    req = req.reply_markup(markup.clone());
                }
                req
            })
            .await
            .map_err(Self::map_err)?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    /// Edits run while a press holds its link, so a `RetryAfter` is reported instead of
    /// slept on.
    async fn edit_message(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<&InlineKeyboard>,
        formatting: Formatting,
    ) -> Result<()> {
        let mut req = self.bot.edit_message_text(
            Self::tg_chat(msg.chat_id),
            Self::tg_msg_id(msg.message_id),
            text.to_string(),
        );
        if let Some(mode) = parse_mode(formatting) {
            req = req.parse_mode(mode);
        }
        if let Some(keyboard) = keyboard {
            req = req.reply_markup(to_markup(keyboard));
        }

        match req.await {
            Ok(_) => Ok(()),
            // Already showing exactly this content.
            Err(RequestError::Api(ApiError::MessageNotModified)) => {
                debug!(message_id = msg.message_id.0, "edit was a no-op");
                Ok(())
            }
            Err(RequestError::RetryAfter(d)) => Err(Error::External(format!(
                "telegram rate limit, edit skipped (retry after {}s)",
                d.as_secs()
            ))),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn answer_callback(&self, callback_id: &str, answer: &CallbackAnswer) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .answer_callback_query(callback_id.to_string())
                .text(answer.text.clone())
                .show_alert(answer.show_alert)
                .cache_time(answer.cache_time)
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }
}
