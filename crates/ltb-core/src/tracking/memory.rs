use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    domain::{LinkId, LinkPatch, TrackedLink},
    errors::Error,
    tracking::{
        locks::{LinkLocks, TxScope},
        store::{ensure_mergeable, LinkStore, LinkTransaction, TransactionBody},
    },
    Result,
};

/// Process-local [`LinkStore`].
///
/// The map lock is only held for single reads and for the commit. Transactions are
/// isolated per link through [`LinkLocks`].
#[derive(Default)]
pub struct MemoryLinkStore {
    links: Mutex<HashMap<String, TrackedLink>>,
    locks: LinkLocks,
}

impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.links.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.links.lock().await.is_empty()
    }

    async fn commit(&self, scope: &TxScope) -> Result<()> {
        let mut links = self.links.lock().await;
        let mut updated = Vec::new();
        for w in scope.writes() {
            let mut link = links
                .get(w.id.as_str())
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("link {}", w.id)))?;
            if w.patch.clicks.is_some() && link.clicks != w.read_clicks {
                return Err(Error::Contention(format!(
                    "link {} changed since it was read",
                    w.id
                )));
            }
            link.apply(&w.patch)?;
            updated.push(link);
        }
        for link in updated {
            links.insert(link.id.as_str().to_string(), link);
        }
        Ok(())
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryLinkStore,
    scope: TxScope,
}

#[async_trait]
impl<'a> LinkTransaction for MemoryTransaction<'a> {
    async fn read(&mut self, id: &LinkId) -> Result<Option<TrackedLink>> {
        if let Some(link) = self.scope.cached(id) {
            return Ok(Some(link));
        }
        self.scope.enter(&self.store.locks, id).await;
        let current = self.store.links.lock().await.get(id.as_str()).cloned();
        if let Some(link) = &current {
            self.scope.remember(link);
        }
        Ok(current)
    }

    async fn write(&mut self, id: &LinkId, patch: LinkPatch) -> Result<()> {
        let Some(mut link) = self.read(id).await? else {
            return Err(Error::NotFound(format!("link {id}")));
        };
        link.apply(&patch)?;
        self.scope.stage(link);
        Ok(())
    }
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn create(&self, link: &TrackedLink) -> Result<()> {
        let mut links = self.links.lock().await;
        if links.contains_key(link.id.as_str()) {
            return Err(Error::Storage(format!("link {} already exists", link.id)));
        }
        links.insert(link.id.as_str().to_string(), link.clone());
        Ok(())
    }

    async fn merge_update(&self, id: &LinkId, patch: LinkPatch) -> Result<()> {
        ensure_mergeable(id, &patch)?;
        let mut links = self.links.lock().await;
        let link = links
            .get_mut(id.as_str())
            .ok_or_else(|| Error::NotFound(format!("link {id}")))?;
        link.apply(&patch)
    }

    async fn get(&self, id: &LinkId) -> Result<Option<TrackedLink>> {
        Ok(self.links.lock().await.get(id.as_str()).cloned())
    }

    async fn run_transaction(&self, body: &mut dyn TransactionBody) -> Result<()> {
        let mut tx = MemoryTransaction {
            store: self,
            scope: TxScope::default(),
        };
        body.run(&mut tx).await?;
        // Link locks are released when `tx` drops, after the commit.
        self.commit(&tx.scope).await
    }
}
