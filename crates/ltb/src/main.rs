use std::sync::Arc;

use tracing::{info, warn};

use ltb_core::{
    config::{Config, StorageBackend},
    tracking::{LinkStore, MemoryLinkStore},
};
use ltb_sqlite::{SqliteLinkStore, SqliteStoreOptions};

#[tokio::main]
async fn main() -> Result<(), ltb_core::Error> {
    ltb_core::logging::init("ltb")?;

    let cfg = Arc::new(Config::load()?);
    let store = open_store(&cfg).await?;

    ltb_telegram::router::run(cfg, store)
        .await
        .map_err(|e| ltb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn LinkStore>, ltb_core::Error> {
    match &cfg.storage {
        StorageBackend::Sqlite { path } => {
            info!(%path, "opening sqlite link store");
            let store = SqliteLinkStore::open(
                path,
                SqliteStoreOptions {
                    max_connections: cfg.database_max_connections,
                    busy_timeout: cfg.tx_busy_timeout,
                    max_attempts: cfg.tx_max_attempts,
                },
            )
            .await?;
            Ok(Arc::new(store))
        }
        StorageBackend::Memory => {
            warn!("using in-memory link store; tracked links are lost on restart");
            Ok(Arc::new(MemoryLinkStore::new()))
        }
    }
}
