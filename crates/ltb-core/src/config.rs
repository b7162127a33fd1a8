use std::{env, fs, net::SocketAddr, path::Path, time::Duration};

use url::Url;

use crate::{errors::Error, Result};

/// Where tracked links are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// SQLite database file.
    Sqlite { path: String },
    /// Process-local map; lost on restart.
    Memory,
}

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    /// Public URL Telegram posts updates to. `None` means long polling.
    pub webhook_url: Option<Url>,
    pub webhook_addr: SocketAddr,

    // Storage
    pub storage: StorageBackend,
    pub database_max_connections: u32,
    pub tx_max_attempts: u32,
    pub tx_busy_timeout: Duration,

    // Clicks
    /// Upper bound on the counter-message edit made while a press holds its link.
    pub edit_timeout: Duration,

    // Commands
    pub track_command: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(env_str)
    }

    /// Build the config from an arbitrary key lookup (the process env in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let telegram_bot_token = lookup("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let webhook_url = match lookup("WEBHOOK_URL").and_then(non_empty) {
            Some(raw) => Some(Url::parse(raw.trim()).map_err(|e| {
                Error::Config(format!("WEBHOOK_URL is not a valid URL ({raw}): {e}"))
            })?),
            None => None,
        };

        let raw_addr = lookup("WEBHOOK_ADDR")
            .and_then(non_empty)
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let webhook_addr = raw_addr
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("WEBHOOK_ADDR is invalid ({raw_addr}): {e}")))?;

        let storage = parse_storage(lookup("DATABASE_URL"));
        let database_max_connections = parse_u32(&lookup, "DATABASE_MAX_CONNECTIONS")?
            .unwrap_or(5)
            .max(1);
        let tx_max_attempts = parse_u32(&lookup, "TX_MAX_ATTEMPTS")?.unwrap_or(5).max(1);
        let tx_busy_timeout =
            Duration::from_millis(parse_u64(&lookup, "TX_BUSY_TIMEOUT_MS")?.unwrap_or(5_000));
        let edit_timeout =
            Duration::from_millis(parse_u64(&lookup, "EDIT_TIMEOUT_MS")?.unwrap_or(5_000).max(1));

        let track_command = lookup("TRACK_COMMAND")
            .and_then(non_empty)
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| "/track".to_string());
        if track_command.chars().any(char::is_whitespace) {
            return Err(Error::Config(format!(
                "TRACK_COMMAND must be a single word, got {track_command:?}"
            )));
        }

        Ok(Self {
            telegram_bot_token,
            webhook_url,
            webhook_addr,
            storage,
            database_max_connections,
            tx_max_attempts,
            tx_busy_timeout,
            edit_timeout,
            track_command,
        })
    }
}

fn parse_storage(v: Option<String>) -> StorageBackend {
    let raw = v.and_then(non_empty).unwrap_or_else(|| "links.db".to_string());
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("memory") {
        return StorageBackend::Memory;
    }
    let path = raw
        .strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
        .unwrap_or(raw);
    StorageBackend::Sqlite {
        path: path.to_string(),
    }
}

fn parse_u32(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u32>> {
    match lookup(key).and_then(non_empty) {
        Some(s) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key} must be a positive integer: {e}"))),
        None => Ok(None),
    }
}

fn parse_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match lookup(key).and_then(non_empty) {
        Some(s) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key} must be a positive integer: {e}"))),
        None => Ok(None),
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
