//! Tracked-link repository over SQLite.
//!
//! A transaction body runs under a per-link lock and reads committed rows; its writes are
//! staged. Only the commit opens a `BEGIN IMMEDIATE` transaction, so SQLite's
//! database-wide write lock is held for a few guarded `UPDATE`s and never while the body
//! talks to the network. The counter update is conditional on the value the body read,
//! which catches writers outside this process. A body never runs twice for one call.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{pool::PoolConnection, Sqlite, SqliteConnection};
use tracing::{debug, info, warn};

use ltb_core::{
    domain::{ChatId, LinkId, LinkPatch, MessageId, TrackedLink},
    errors::Error,
    tracking::{
        locks::{LinkLocks, StagedWrite, TxScope},
        store::{ensure_mergeable, LinkStore, LinkTransaction, TransactionBody},
    },
    Result,
};

use crate::sqlite_pool::SqlitePoolManager;

const SELECT_LINK: &str = r#"
    SELECT id, url, clicks, chat_id, message_id, created_at
    FROM tracked_links
    WHERE id = ?1
"#;

#[derive(Clone, Copy, Debug)]
pub struct SqliteStoreOptions {
    pub max_connections: u32,
    /// Per-statement wait for a competing writer.
    pub busy_timeout: Duration,
    /// Attempts at opening a write transaction before reporting contention.
    pub max_attempts: u32,
}

impl Default for SqliteStoreOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

#[derive(Clone)]
pub struct SqliteLinkStore {
    pool_manager: SqlitePoolManager,
    max_attempts: u32,
    locks: Arc<LinkLocks>,
}

impl SqliteLinkStore {
    pub async fn open(path: &str, opts: SqliteStoreOptions) -> Result<Self> {
        let pool_manager =
            SqlitePoolManager::new(path, opts.max_connections.max(1), opts.busy_timeout)
                .await
                .map_err(map_err)?;
        let store = Self {
            pool_manager,
            max_attempts: opts.max_attempts.max(1),
            locks: Arc::new(LinkLocks::default()),
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        info!("creating tracked_links table if not exists");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_links (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                clicks INTEGER NOT NULL DEFAULT 0 CHECK (clicks >= 0),
                chat_id INTEGER NOT NULL,
                message_id INTEGER,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool_manager.pool())
        .await
        .map_err(map_err)?;

        Ok(())
    }

    async fn begin_immediate(&self) -> Result<TxGuard> {
        let mut attempt = 1u32;
        loop {
            match self.try_begin().await {
                Ok(guard) => return Ok(guard),
                Err(Error::Contention(msg)) if attempt < self.max_attempts => {
                    debug!(attempt, "write lock busy, retrying: {msg}");
                    tokio::time::sleep(backoff(attempt)).await;
                    attempt += 1;
                }
                Err(Error::Contention(msg)) => {
                    return Err(Error::Contention(format!(
                        "gave up after {attempt} attempts: {msg}"
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_begin(&self) -> Result<TxGuard> {
        let mut conn = self
            .pool_manager
            .pool()
            .acquire()
            .await
            .map_err(map_err)?;
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(map_err)?;
        Ok(TxGuard { conn: Some(conn) })
    }
}

fn backoff(attempt: u32) -> Duration {
    let ms = 20u64.saturating_mul(1 << attempt.min(5).saturating_sub(1));
    Duration::from_millis(ms.min(500))
}

#[async_trait]
impl LinkStore for SqliteLinkStore {
    async fn create(&self, link: &TrackedLink) -> Result<()> {
        let clicks = to_db_clicks(link.clicks)?;
        sqlx::query(
            r#"
            INSERT INTO tracked_links (id, url, clicks, chat_id, message_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(link.id.as_str())
        .bind(&link.url)
        .bind(clicks)
        .bind(link.chat_id.0)
        .bind(link.message_id.map(|m| i64::from(m.0)))
        .bind(link.created_at)
        .execute(self.pool_manager.pool())
        .await
        .map_err(map_err)?;

        debug!(link_id = %link.id, "saved tracked link");
        Ok(())
    }

    async fn merge_update(&self, id: &LinkId, patch: LinkPatch) -> Result<()> {
        ensure_mergeable(id, &patch)?;
        let mut conn = self
            .pool_manager
            .pool()
            .acquire()
            .await
            .map_err(map_err)?;
        apply_patch(&mut conn, id, &patch).await
    }

    async fn get(&self, id: &LinkId) -> Result<Option<TrackedLink>> {
        let row: Option<LinkRow> = sqlx::query_as(SELECT_LINK)
            .bind(id.as_str())
            .fetch_optional(self.pool_manager.pool())
            .await
            .map_err(map_err)?;
        row.map(LinkRow::into_link).transpose()
    }

    async fn run_transaction(&self, body: &mut dyn TransactionBody) -> Result<()> {
        let mut tx = SqliteTransaction {
            store: self,
            scope: TxScope::default(),
        };
        body.run(&mut tx).await?;

        let writes = tx.scope.writes();
        if writes.is_empty() {
            return Ok(());
        }

        // Link locks stay held (in `tx`) until the commit is done.
        let mut guard = self.begin_immediate().await?;
        let outcome = commit_writes(guard.conn()?, &writes).await;
        match outcome {
            Ok(()) => guard.commit().await,
            Err(e) => {
                guard.rollback().await;
                Err(e)
            }
        }
    }
}

async fn commit_writes(conn: &mut SqliteConnection, writes: &[StagedWrite]) -> Result<()> {
    for w in writes {
        if let Some(clicks) = w.patch.clicks {
            let res = sqlx::query(
                "UPDATE tracked_links SET clicks = ?1 WHERE id = ?2 AND clicks = ?3",
            )
            .bind(to_db_clicks(clicks)?)
            .bind(w.id.as_str())
            .bind(to_db_clicks(w.read_clicks)?)
            .execute(&mut *conn)
            .await
            .map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(match fetch_link(conn, &w.id).await? {
                    None => Error::NotFound(format!("link {}", w.id)),
                    Some(current) => Error::Contention(format!(
                        "link {} changed since it was read ({} -> {})",
                        w.id, w.read_clicks, current.clicks
                    )),
                });
            }
        }
        if let Some(message_id) = w.patch.message_id {
            apply_patch(conn, &w.id, &LinkPatch::message_id(message_id)).await?;
        }
    }
    Ok(())
}

/// Owns the connection of an open `BEGIN IMMEDIATE` transaction.
///
/// If it is dropped unfinished (the caller's future was cancelled) the connection is
/// detached and closed, which makes SQLite roll the transaction back.
struct TxGuard {
    conn: Option<PoolConnection<Sqlite>>,
}

impl TxGuard {
    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::Storage("transaction already finished".to_string()))
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Err(Error::Storage("transaction already finished".to_string()));
        };
        match sqlx::query("COMMIT").execute(&mut *conn).await {
            Ok(_) => Ok(()),
            Err(e) => {
                drop(conn.detach());
                Err(map_err(e))
            }
        }
    }

    async fn rollback(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            warn!("rollback failed, closing connection: {e}");
            drop(conn.detach());
        }
    }
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("transaction abandoned before completion; closing its connection");
            drop(conn.detach());
        }
    }
}

struct SqliteTransaction<'s> {
    store: &'s SqliteLinkStore,
    scope: TxScope,
}

#[async_trait]
impl<'s> LinkTransaction for SqliteTransaction<'s> {
    async fn read(&mut self, id: &LinkId) -> Result<Option<TrackedLink>> {
        if let Some(link) = self.scope.cached(id) {
            return Ok(Some(link));
        }
        self.scope.enter(&self.store.locks, id).await;
        let current = self.store.get(id).await?;
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

async fn fetch_link(conn: &mut SqliteConnection, id: &LinkId) -> Result<Option<TrackedLink>> {
    let row: Option<LinkRow> = sqlx::query_as(SELECT_LINK)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_err)?;
    row.map(LinkRow::into_link).transpose()
}

/// Apply `patch` with the same rules as [`TrackedLink::apply`], enforced in SQL.
async fn apply_patch(conn: &mut SqliteConnection, id: &LinkId, patch: &LinkPatch) -> Result<()> {
    if let Some(clicks) = patch.clicks {
        let clicks = to_db_clicks(clicks)?;
        let res = sqlx::query("UPDATE tracked_links SET clicks = ?1 WHERE id = ?2 AND clicks <= ?1")
            .bind(clicks)
            .bind(id.as_str())
            .execute(&mut *conn)
            .await
            .map_err(map_err)?;
        if res.rows_affected() == 0 {
            return Err(rejected(conn, id, "clicks cannot decrease").await);
        }
    }

    if let Some(message_id) = patch.message_id {
        let res = sqlx::query(
            r#"
            UPDATE tracked_links SET message_id = ?1
            WHERE id = ?2 AND (message_id IS NULL OR message_id = ?1)
            "#,
        )
        .bind(i64::from(message_id.0))
        .bind(id.as_str())
        .execute(&mut *conn)
        .await
        .map_err(map_err)?;
        if res.rows_affected() == 0 {
            return Err(rejected(conn, id, "message id is already attached").await);
        }
    }

    Ok(())
}

/// Explain a zero-row update: missing record or a broken invariant.
async fn rejected(conn: &mut SqliteConnection, id: &LinkId, reason: &str) -> Error {
    match fetch_link(conn, id).await {
        Ok(None) => Error::NotFound(format!("link {id}")),
        Ok(Some(_)) => Error::Storage(format!("update of {id} rejected: {reason}")),
        Err(e) => e,
    }
}

#[derive(sqlx::FromRow)]
struct LinkRow {
    id: String,
    url: String,
    clicks: i64,
    chat_id: i64,
    message_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl LinkRow {
    fn into_link(self) -> Result<TrackedLink> {
        let clicks = u64::try_from(self.clicks)
            .map_err(|_| Error::Storage(format!("negative clicks for {}", self.id)))?;
        let message_id = self
            .message_id
            .map(|m| {
                i32::try_from(m)
                    .map(MessageId)
                    .map_err(|_| Error::Storage(format!("message id {m} out of range")))
            })
            .transpose()?;

        Ok(TrackedLink {
            id: LinkId::new(self.id),
            url: self.url,
            clicks,
            chat_id: ChatId(self.chat_id),
            message_id,
            created_at: self.created_at,
        })
    }
}

fn to_db_clicks(clicks: u64) -> Result<i64> {
    i64::try_from(clicks).map_err(|_| Error::Storage(format!("clicks {clicks} out of range")))
}

/// Map `sqlx` errors, separating lock contention from everything else.
pub(crate) fn map_err(e: sqlx::Error) -> Error {
    if is_busy(&e) {
        Error::Contention(e.to_string())
    } else {
        Error::Storage(e.to_string())
    }
}

fn is_busy(e: &sqlx::Error) -> bool {
    match e {
        // SQLITE_BUSY (5) / SQLITE_LOCKED (6), including extended codes.
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            .is_some_and(|c| matches!(c & 0xff, 5 | 6)),
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}
