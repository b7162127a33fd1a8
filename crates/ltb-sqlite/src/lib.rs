//! SQLite-backed [`LinkStore`](ltb_core::tracking::LinkStore).
//!
//! ## Modules
//!
//! - `sqlite_pool` – SqlitePoolManager (pool + pragmas)
//! - `link_repo` – SqliteLinkStore (records, merge updates, transactions)

mod link_repo;
mod sqlite_pool;

#[cfg(test)]
mod link_repo_test;

pub use link_repo::{SqliteLinkStore, SqliteStoreOptions};
pub use sqlite_pool::SqlitePoolManager;
