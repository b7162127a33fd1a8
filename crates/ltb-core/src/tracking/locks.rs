//! Per-link isolation shared by the [`LinkStore`](super::store::LinkStore) backends.
//!
//! A transaction locks each link it reads and keeps the lock until it has committed or
//! rolled back. Transactions on the same link queue behind each other; transactions on
//! different links never wait on one another.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{LinkId, LinkPatch, TrackedLink};

/// Lock entries nobody holds are dropped once the map reaches this size.
const PRUNE_AT: usize = 1024;

#[derive(Default)]
pub struct LinkLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LinkLocks {
    pub async fn lock_link(&self, id: &LinkId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() >= PRUNE_AT {
                // Waiters hold a clone, so a count of 1 means idle.
                map.retain(|_, l| Arc::strong_count(l) > 1);
            }
            map.entry(id.as_str().to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// A staged change, with the counter value it was based on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagedWrite {
    pub id: LinkId,
    pub read_clicks: u64,
    /// Only the fields that changed.
    pub patch: LinkPatch,
}

/// Locks held, records read and writes staged by one transaction.
#[derive(Default)]
pub struct TxScope {
    held: HashMap<String, OwnedMutexGuard<()>>,
    read: HashMap<String, TrackedLink>,
    staged: HashMap<String, TrackedLink>,
}

impl TxScope {
    /// Take the link's lock unless this transaction already holds it.
    ///
    /// Bodies touching several links should read them in a consistent order.
    pub async fn enter(&mut self, locks: &LinkLocks, id: &LinkId) {
        if !self.held.contains_key(id.as_str()) {
            let guard = locks.lock_link(id).await;
            self.held.insert(id.as_str().to_string(), guard);
        }
    }

    /// This transaction's view of a record it already touched.
    pub fn cached(&self, id: &LinkId) -> Option<TrackedLink> {
        self.staged
            .get(id.as_str())
            .or_else(|| self.read.get(id.as_str()))
            .cloned()
    }

    pub fn remember(&mut self, link: &TrackedLink) {
        self.read.insert(link.id.as_str().to_string(), link.clone());
    }

    pub fn stage(&mut self, link: TrackedLink) {
        self.staged.insert(link.id.as_str().to_string(), link);
    }

    pub fn writes(&self) -> Vec<StagedWrite> {
        self.staged
            .values()
            .filter_map(|after| {
                let before = self.read.get(after.id.as_str())?;
                let patch = LinkPatch {
                    clicks: (after.clicks != before.clicks).then_some(after.clicks),
                    message_id: after.message_id.filter(|_| after.message_id != before.message_id),
                };
                (!patch.is_empty()).then(|| StagedWrite {
                    id: after.id.clone(),
                    read_clicks: before.clicks,
                    patch,
                })
            })
            .collect()
    }
}
