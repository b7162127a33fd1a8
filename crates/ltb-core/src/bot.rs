use std::{sync::Arc, time::Duration};

use tracing::{debug, error};

use crate::{
    messaging::{port::MessagingPort, types::IncomingUpdate},
    tracking::{ClickEngine, ClickOutcome, CommandHandler, CommandOutcome, LinkStore},
};

/// Result of handling one update. Mostly useful for tests and logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Command(CommandOutcome),
    Click(ClickOutcome),
    Ignored,
    /// The handler failed; the error has been logged.
    Failed,
}

/// Routes incoming updates to the command handler or the click engine.
///
/// This is the event boundary: nothing returned from here is an error, so the transport
/// can always acknowledge the update.
pub struct LinkBot {
    commands: CommandHandler,
    clicks: ClickEngine,
}

impl LinkBot {
    pub fn new(
        store: Arc<dyn LinkStore>,
        messenger: Arc<dyn MessagingPort>,
        track_command: impl Into<String>,
    ) -> Self {
        Self {
            commands: CommandHandler::new(store.clone(), messenger.clone(), track_command),
            clicks: ClickEngine::new(store, messenger),
        }
    }

    /// The bot's own username, for `/command@username` in group chats.
    pub fn with_bot_username(mut self, username: impl Into<String>) -> Self {
        self.commands = self.commands.with_bot_username(username);
        self
    }

    pub fn with_edit_timeout(mut self, timeout: Duration) -> Self {
        self.clicks = self.clicks.with_edit_timeout(timeout);
        self
    }

    pub async fn handle_update(&self, update: IncomingUpdate) -> UpdateOutcome {
        match update {
            IncomingUpdate::Message(msg) => match self.commands.handle(&msg).await {
                Ok(outcome) => UpdateOutcome::Command(outcome),
                Err(e) => {
                    error!(chat_id = msg.chat_id.0, text = %msg.text, "failed to handle message: {e}");
                    UpdateOutcome::Failed
                }
            },
            IncomingUpdate::Callback(q) => match self.clicks.handle(&q).await {
                Ok(outcome) => UpdateOutcome::Click(outcome),
                Err(e) => {
                    error!(
                        link_id = %q.data,
                        callback_id = %q.callback_id,
                        chat_id = ?q.message.map(|m| m.chat_id.0),
                        "click transaction failed: {e}"
                    );
                    UpdateOutcome::Failed
                }
            },
            IncomingUpdate::Other => {
                debug!("ignoring unsupported update");
                UpdateOutcome::Ignored
            }
        }
    }
}
