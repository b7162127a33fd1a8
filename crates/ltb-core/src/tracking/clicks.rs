use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::{
    domain::{LinkId, LinkPatch},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{CallbackQuery, Formatting},
    },
    tracking::{
        render,
        store::{LinkStore, LinkTransaction, TransactionBody},
    },
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClickOutcome {
    /// The press referenced a link that does not exist. Nothing was written or answered.
    NotFound,
    Counted {
        clicks: u64,
        /// The counter message now shows `clicks`.
        edited: bool,
        /// The presser got the toast.
        acknowledged: bool,
    },
}

/// Default bound on the counter-message edit.
pub const DEFAULT_EDIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Counts button presses.
///
/// Each press is one storage transaction: read, increment, write, edit the counter
/// message. The press is answered only once that transaction has committed.
pub struct ClickEngine {
    store: Arc<dyn LinkStore>,
    messenger: Arc<dyn MessagingPort>,
    edit_timeout: Duration,
}

impl ClickEngine {
    pub fn new(store: Arc<dyn LinkStore>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            store,
            messenger,
            edit_timeout: DEFAULT_EDIT_TIMEOUT,
        }
    }

    /// Presses on the same link wait for each other's edit, so the edit is cut short
    /// after `timeout`.
    pub fn with_edit_timeout(mut self, timeout: Duration) -> Self {
        self.edit_timeout = timeout;
        self
    }

    /// Apply one press. Errors mean the transaction did not commit; nothing was answered.
    pub async fn handle(&self, press: &CallbackQuery) -> Result<ClickOutcome> {
        let link_id = LinkId::new(press.data.clone());
        let mut body = ClickBody {
            link_id: &link_id,
            messenger: self.messenger.as_ref(),
            edit_timeout: self.edit_timeout,
            counted: None,
        };
        self.store.run_transaction(&mut body).await?;

        let counted = body.counted.ok_or_else(|| {
            Error::Storage(format!(
                "transaction for {link_id} committed without running its body"
            ))
        })?;
        let Some(Counted { clicks, edited }) = counted else {
            warn!(link_id = %link_id, "button press for unknown link; dropping it");
            return Ok(ClickOutcome::NotFound);
        };

        let acknowledged = match self
            .messenger
            .answer_callback(&press.callback_id, &render::click_answer(clicks))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(link_id = %link_id, clicks, "failed to answer button press: {e}");
                false
            }
        };

        info!(link_id = %link_id, clicks, edited, acknowledged, "counted click");
        Ok(ClickOutcome::Counted {
            clicks,
            edited,
            acknowledged,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Counted {
    clicks: u64,
    edited: bool,
}

/// Transaction body for a single press.
struct ClickBody<'a> {
    link_id: &'a LinkId,
    messenger: &'a dyn MessagingPort,
    edit_timeout: Duration,
    /// `Some(None)`: the link does not exist.
    counted: Option<Option<Counted>>,
}

#[async_trait]
impl<'a> TransactionBody for ClickBody<'a> {
    async fn run(&mut self, tx: &mut dyn LinkTransaction) -> Result<()> {
        self.counted = None;

        let Some(link) = tx.read(self.link_id).await? else {
            self.counted = Some(None);
            return Ok(());
        };

        let clicks = link.clicks + 1;
        tx.write(self.link_id, LinkPatch::clicks(clicks)).await?;

        // Editing while the record is still locked keeps edits in commit order.
        let edited = match link.message_ref() {
            Some(msg) => {
                let keyboard = render::counter_keyboard(&link, clicks);
                let text = render::tracking_text(&link.url);
                let edit = self
                    .messenger
                    .edit_message(msg, &text, Some(&keyboard), Formatting::Html);
                match tokio::time::timeout(self.edit_timeout, edit).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        warn!(link_id = %link.id, clicks, "failed to edit counter message: {e}");
                        false
                    }
                    Err(_) => {
                        warn!(
                            link_id = %link.id,
                            clicks,
                            timeout_ms = self.edit_timeout.as_millis() as u64,
                            "counter message edit timed out"
                        );
                        false
                    }
                }
            }
            None => {
                debug!(link_id = %link.id, "no message attached; counter not displayed");
                false
            }
        };

        self.counted = Some(Some(Counted { clicks, edited }));
        Ok(())
    }
}
