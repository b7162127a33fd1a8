use async_trait::async_trait;

use crate::{
    domain::{LinkId, LinkPatch, TrackedLink},
    errors::Error,
    Result,
};

/// Read/write handle scoped to one storage transaction.
///
/// Reads observe the latest committed state plus this transaction's own writes.
/// Writes become visible to others only when the transaction commits.
#[async_trait]
pub trait LinkTransaction: Send {
    async fn read(&mut self, id: &LinkId) -> Result<Option<TrackedLink>>;
    async fn write(&mut self, id: &LinkId, patch: LinkPatch) -> Result<()>;
}

/// Work executed inside [`LinkStore::run_transaction`].
///
/// Any event context the body needs is carried as fields. The body keeps its own
/// results; the store only reports whether the transaction committed.
#[async_trait]
pub trait TransactionBody: Send {
    async fn run(&mut self, tx: &mut dyn LinkTransaction) -> Result<()>;
}

/// Persistence port for tracked links.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    async fn create(&self, link: &TrackedLink) -> Result<()>;

    /// Update only the fields set in `patch`. Never touches `clicks`.
    async fn merge_update(&self, id: &LinkId, patch: LinkPatch) -> Result<()>;

    async fn get(&self, id: &LinkId) -> Result<Option<TrackedLink>>;

    /// Run `body` atomically: its writes commit if it returns `Ok`, and roll back otherwise.
    ///
    /// Concurrent transactions touching the same record are serialized; the record stays
    /// locked from the body's first read until the commit. Transactions on different
    /// records never wait on each other. The body runs at most once per call.
    async fn run_transaction(&self, body: &mut dyn TransactionBody) -> Result<()>;
}

/// Guard for [`LinkStore::merge_update`] implementations: `clicks` only moves inside a transaction.
pub fn ensure_mergeable(id: &LinkId, patch: &LinkPatch) -> Result<()> {
    if patch.clicks.is_some() {
        return Err(Error::Storage(format!(
            "refusing to merge clicks for {id} outside a transaction"
        )));
    }
    Ok(())
}
