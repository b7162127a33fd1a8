//! User-visible strings and the counter keyboard.

use url::Url;

use crate::{
    domain::TrackedLink,
    messaging::types::{CallbackAnswer, InlineButton, InlineKeyboard},
};

/// Label shown on the counter button.
pub fn counter_label(clicks: u64) -> String {
    format!("Clicks: {clicks}")
}

/// The one-button keyboard attached to a tracking message.
pub fn counter_keyboard(link: &TrackedLink, clicks: u64) -> InlineKeyboard {
    InlineKeyboard::single(InlineButton {
        label: counter_label(clicks),
        activation_url: link.url.clone(),
        correlation_token: link.id.as_str().to_string(),
    })
}

/// Body of the tracking message (Telegram HTML).
///
/// The URL appears once, as the link target; the visible text is its host.
pub fn tracking_text(url: &str) -> String {
    let label = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "link".to_string());
    format!(
        "🔗 Link rastreado: <a href=\"{}\">{}</a>",
        escape_html(url),
        escape_html(&label)
    )
}

/// Toast shown to the user who pressed the button.
pub fn click_answer(clicks: u64) -> CallbackAnswer {
    CallbackAnswer::toast(format!("Contador atualizado! ({clicks} cliques)"))
}

pub fn help_text(command: &str) -> String {
    format!("Envie {command} <link> para rastrear os cliques de um link.")
}

pub fn invalid_link_text(command: &str) -> String {
    format!("Link inválido. Exemplo: {command} https://example.com")
}

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
