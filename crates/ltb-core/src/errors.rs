/// Core error type for the link tracker.
///
/// Adapter crates map their specific errors (`sqlx`, `teloxide`) into this type so
/// the event boundary can log them consistently and decide what to skip.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Write contention the storage backend gave up retrying.
    #[error("storage contention: {0}")]
    Contention(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
