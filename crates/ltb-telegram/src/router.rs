use std::sync::Arc;

use teloxide::{
    dispatching::Dispatcher, dptree, error_handlers::LoggingErrorHandler, prelude::*,
    update_listeners::webhooks,
};
use tracing::{debug, info, warn};

use ltb_core::{
    bot::LinkBot, config::Config, messaging::port::MessagingPort, tracking::LinkStore,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub link_bot: Arc<LinkBot>,
}

/// How updates reach the bot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateSource {
    /// Telegram pushes updates to a local HTTP listener.
    Webhook {
        addr: std::net::SocketAddr,
        url: url::Url,
    },
    LongPolling,
}

impl UpdateSource {
    pub fn from_config(cfg: &Config) -> Self {
        match &cfg.webhook_url {
            Some(url) => UpdateSource::Webhook {
                addr: cfg.webhook_addr,
                url: url.clone(),
            },
            None => UpdateSource::LongPolling,
        }
    }
}

/// Wire the store to Telegram and serve updates until shutdown.
pub async fn run(cfg: Arc<Config>, store: Arc<dyn LinkStore>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let mut link_bot = LinkBot::new(store, messenger, cfg.track_command.clone())
        .with_edit_timeout(cfg.edit_timeout);
    match bot.get_me().await {
        Ok(me) => {
            info!("ltb started: @{}", me.username());
            link_bot = link_bot.with_bot_username(me.username());
        }
        Err(e) => warn!("could not fetch bot identity, /command@bot mentions are ignored: {e}"),
    }

    let state = Arc::new(AppState {
        link_bot: Arc::new(link_bot),
    });

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!(update_id = upd.id, "ignoring unsupported update");
        })
        .enable_ctrlc_handler()
        .build();

    match UpdateSource::from_config(&cfg) {
        UpdateSource::Webhook { addr, url } => {
            info!(%addr, %url, "receiving updates via webhook");
            let listener = webhooks::axum(bot, webhooks::Options::new(addr, url)).await?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("webhook listener error"),
                )
                .await;
        }
        UpdateSource::LongPolling => {
            info!("WEBHOOK_URL not set, receiving updates via long polling");
            dispatcher.dispatch().await;
        }
    }

    info!("ltb stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let pairs: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| {
            pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        })
        .unwrap()
    }

    #[test]
    fn polls_without_webhook_url() {
        let cfg = config(&[("TELEGRAM_BOT_TOKEN", "t")]);
        assert_eq!(UpdateSource::from_config(&cfg), UpdateSource::LongPolling);
    }

    #[test]
    fn webhook_when_url_is_set() {
        let cfg = config(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("WEBHOOK_URL", "https://bot.example.com/telegram"),
            ("WEBHOOK_ADDR", "127.0.0.1:8443"),
        ]);
        match UpdateSource::from_config(&cfg) {
            UpdateSource::Webhook { addr, url } => {
                assert_eq!(addr.port(), 8443);
                assert_eq!(url.path(), "/telegram");
            }
            other => panic!("expected webhook, got {other:?}"),
        }
    }
}
