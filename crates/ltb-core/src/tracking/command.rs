use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::{
    domain::{LinkId, LinkPatch, TrackedLink},
    messaging::{
        port::MessagingPort,
        types::{Formatting, TextMessage},
    },
    tracking::{render, store::LinkStore},
    Result,
};

/// What a chat message asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackRequest<'a> {
    NotCommand,
    /// `/cmd@SomeOtherBot`: meant for a different bot in the same chat.
    OtherBot,
    /// The tracking command with a missing or malformed URL.
    Invalid,
    Valid(&'a str),
}

/// Parse `"<command>[@bot] <url>"`.
///
/// Only the first whitespace run separates the command from its argument; the rest of
/// the text is the URL candidate. A `@mention` must name `bot_username`; with no known
/// username every mention is treated as addressed to another bot.
pub fn parse_track_command<'a>(
    text: &'a str,
    command: &str,
    bot_username: Option<&str>,
) -> TrackRequest<'a> {
    let text = text.trim_start();
    let (head, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
    let (name, mention) = match head.split_once('@') {
        Some((name, mention)) => (name, Some(mention)),
        None => (head, None),
    };
    if let Some(mention) = mention {
        if head.starts_with('/')
            && !bot_username.is_some_and(|me| me.eq_ignore_ascii_case(mention))
        {
            return TrackRequest::OtherBot;
        }
    }
    if name != command {
        return TrackRequest::NotCommand;
    }

    let candidate = rest.trim();
    if candidate.is_empty() || !is_trackable_url(candidate) {
        return TrackRequest::Invalid;
    }
    TrackRequest::Valid(candidate)
}

/// Longest URL accepted; keeps the tracking message well under Telegram's text limit.
pub const MAX_URL_LEN: usize = 2048;

/// Absolute `http(s)` URL with a host.
pub fn is_trackable_url(candidate: &str) -> bool {
    if candidate.len() > MAX_URL_LEN {
        return false;
    }
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    Help,
    /// Addressed to another bot; no reply.
    NotAddressed,
    InvalidLink,
    Tracked {
        link: TrackedLink,
        /// `false` when the message id could not be written back.
        attached: bool,
    },
}

/// Handles the tracking command.
pub struct CommandHandler {
    store: Arc<dyn LinkStore>,
    messenger: Arc<dyn MessagingPort>,
    command: String,
    bot_username: Option<String>,
}

impl CommandHandler {
    pub fn new(
        store: Arc<dyn LinkStore>,
        messenger: Arc<dyn MessagingPort>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            store,
            messenger,
            command: command.into(),
            bot_username: None,
        }
    }

    /// Accept `/command@<username>` as well as the bare command.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        let username = username.into();
        self.bot_username = Some(username.trim_start_matches('@').to_string());
        self
    }

    pub async fn handle(&self, msg: &TextMessage) -> Result<CommandOutcome> {
        let request =
            parse_track_command(&msg.text, &self.command, self.bot_username.as_deref());
        let url = match request {
            TrackRequest::OtherBot => return Ok(CommandOutcome::NotAddressed),
            TrackRequest::NotCommand => {
                self.messenger
                    .send_message(
                        msg.chat_id,
                        &render::help_text(&self.command),
                        None,
                        Formatting::Plain,
                    )
                    .await?;
                return Ok(CommandOutcome::Help);
            }
            TrackRequest::Invalid => {
                info!(chat_id = msg.chat_id.0, "rejected tracking request with invalid link");
                self.messenger
                    .send_message(
                        msg.chat_id,
                        &render::invalid_link_text(&self.command),
                        None,
                        Formatting::Plain,
                    )
                    .await?;
                return Ok(CommandOutcome::InvalidLink);
            }
            TrackRequest::Valid(url) => url,
        };

        let mut link = TrackedLink::new(LinkId::generate(), url, msg.chat_id);
        self.store.create(&link).await?;

        let keyboard = render::counter_keyboard(&link, link.clicks);
        let sent = self
            .messenger
            .send_message(
                msg.chat_id,
                &render::tracking_text(&link.url),
                Some(&keyboard),
                Formatting::Html,
            )
            .await?;

        // The record is already usable by id; a failed attach only disables edits.
        let attached = match self
            .store
            .merge_update(&link.id, LinkPatch::message_id(sent.message_id))
            .await
        {
            Ok(()) => {
                link.message_id = Some(sent.message_id);
                true
            }
            Err(e) => {
                warn!(
                    link_id = %link.id,
                    chat_id = msg.chat_id.0,
                    message_id = sent.message_id.0,
                    "failed to attach message id to tracked link: {e}"
                );
                false
            }
        };

        info!(link_id = %link.id, chat_id = msg.chat_id.0, url = %link.url, "tracking new link");
        Ok(CommandOutcome::Tracked { link, attached })
    }
}
