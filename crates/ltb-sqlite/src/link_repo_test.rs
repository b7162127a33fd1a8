//! Tests for SqliteLinkStore.
//!
//! Covers record CRUD, merge-update invariants, commit/rollback, concurrent increments
//! and per-link isolation.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tempfile::TempDir;

use ltb_core::{
    domain::{ChatId, LinkId, LinkPatch, MessageId, TrackedLink},
    errors::Error,
    messaging::types::{CallbackQuery, TextMessage},
    testing::FakeMessenger,
    tracking::{
        render,
        store::{LinkStore, LinkTransaction, TransactionBody},
        ClickEngine, ClickOutcome, CommandHandler, CommandOutcome,
    },
    Result,
};

use crate::link_repo::{SqliteLinkStore, SqliteStoreOptions};

async fn open_store(dir: &TempDir) -> SqliteLinkStore {
    open_store_with(dir, SqliteStoreOptions::default()).await
}

async fn open_store_with(dir: &TempDir, opts: SqliteStoreOptions) -> SqliteLinkStore {
    let path = dir.path().join("links.db");
    SqliteLinkStore::open(path.to_str().expect("utf-8 path"), opts)
        .await
        .expect("Failed to open store")
}

/// Short busy timeout and few attempts, so any database-wide wait shows up as an error.
fn impatient() -> SqliteStoreOptions {
    SqliteStoreOptions {
        busy_timeout: Duration::from_millis(200),
        max_attempts: 2,
        ..SqliteStoreOptions::default()
    }
}

fn sample(id: &str) -> TrackedLink {
    TrackedLink::new(LinkId::new(id), "https://example.com", ChatId(-100))
}

/// Read-increment-write, remembering what it committed.
struct Increment {
    id: LinkId,
    runs: Arc<AtomicUsize>,
    fail: bool,
    /// How long the body keeps going after its write.
    hold: Duration,
    entered: Option<tokio::sync::oneshot::Sender<()>>,
    seen: Option<u64>,
}

impl Increment {
    fn new(id: &LinkId) -> Self {
        Self {
            id: id.clone(),
            runs: Arc::new(AtomicUsize::new(0)),
            fail: false,
            hold: Duration::from_millis(2),
            entered: None,
            seen: None,
        }
    }
}

#[async_trait]
impl TransactionBody for Increment {
    async fn run(&mut self, tx: &mut dyn LinkTransaction) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let Some(link) = tx.read(&self.id).await? else {
            return Ok(());
        };
        let next = link.clicks + 1;
        tx.write(&self.id, LinkPatch::clicks(next)).await?;
        if let Some(entered) = self.entered.take() {
            let _ = entered.send(());
        }
        // Widen the window for a competing writer.
        tokio::time::sleep(self.hold).await;
        if self.fail {
            return Err(Error::External("body failed".to_string()));
        }
        self.seen = Some(next);
        Ok(())
    }
}

#[tokio::test]
async fn test_create_and_get() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let link = sample("a1");

    store.create(&link).await.expect("Failed to create link");

    let got = store
        .get(&link.id)
        .await
        .expect("Failed to get link")
        .expect("link should exist");
    assert_eq!(got.id, link.id);
    assert_eq!(got.url, "https://example.com");
    assert_eq!(got.clicks, 0);
    assert_eq!(got.chat_id, ChatId(-100));
    assert_eq!(got.message_id, None);

    assert!(store.get(&LinkId::new("missing")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_rejects_duplicate_id() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    store.create(&sample("dup")).await.unwrap();
    assert!(store.create(&sample("dup")).await.is_err());
}

#[tokio::test]
async fn test_merge_update_rules() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let link = sample("m1");
    store.create(&link).await.unwrap();

    store
        .merge_update(&link.id, LinkPatch::message_id(MessageId(12)))
        .await
        .expect("Failed to attach message id");
    // Same value again is fine, a different one is not.
    store
        .merge_update(&link.id, LinkPatch::message_id(MessageId(12)))
        .await
        .unwrap();
    assert!(store
        .merge_update(&link.id, LinkPatch::message_id(MessageId(13)))
        .await
        .is_err());
    assert!(store
        .merge_update(&link.id, LinkPatch::clicks(5))
        .await
        .is_err());

    let got = store.get(&link.id).await.unwrap().unwrap();
    assert_eq!(got.message_id, Some(MessageId(12)));
    assert_eq!(got.clicks, 0);

    let err = store
        .merge_update(&LinkId::new("ghost"), LinkPatch::message_id(MessageId(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn test_transaction_commit_and_rollback() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let link = sample("t1");
    store.create(&link).await.unwrap();

    let mut ok = Increment::new(&link.id);
    store.run_transaction(&mut ok).await.unwrap();
    assert_eq!(ok.seen, Some(1));
    assert_eq!(store.get(&link.id).await.unwrap().unwrap().clicks, 1);

    let mut failing = Increment::new(&link.id);
    failing.fail = true;
    assert!(store.run_transaction(&mut failing).await.is_err());
    assert_eq!(store.get(&link.id).await.unwrap().unwrap().clicks, 1);

    // The pool is still usable after a rollback.
    let mut again = Increment::new(&link.id);
    store.run_transaction(&mut again).await.unwrap();
    assert_eq!(again.seen, Some(2));
}

#[tokio::test]
async fn test_transaction_on_missing_link_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let mut body = Increment::new(&LinkId::new("nothing"));
    store.run_transaction(&mut body).await.unwrap();
    assert_eq!(body.seen, None);
    assert!(store.get(&LinkId::new("nothing")).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_serialize() {
    const N: usize = 20;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);
    let link = sample("c1");
    store.create(&link).await.unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for _ in 0..N {
        let store = store.clone();
        let mut body = Increment::new(&link.id);
        body.runs = runs.clone();
        tasks.push(tokio::spawn(async move {
            store.run_transaction(&mut body).await.map(|_| body.seen)
        }));
    }

    let mut seen = Vec::new();
    for t in tasks {
        seen.push(t.await.unwrap().unwrap().expect("link exists"));
    }
    seen.sort_unstable();

    let expected: Vec<u64> = (1..=N as u64).collect();
    assert_eq!(seen, expected);
    assert_eq!(runs.load(Ordering::SeqCst), N, "each body runs exactly once");
    assert_eq!(
        store.get(&link.id).await.unwrap().unwrap().clicks,
        N as u64
    );
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let link = sample("p1");
    {
        let store = open_store(&dir).await;
        store.create(&link).await.unwrap();
        let mut body = Increment::new(&link.id);
        store.run_transaction(&mut body).await.unwrap();
    }

    let store = open_store(&dir).await;
    assert_eq!(store.get(&link.id).await.unwrap().unwrap().clicks, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_transaction_does_not_block_other_links() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store_with(&dir, impatient()).await);
    let a = sample("link-a");
    let b = sample("link-b");
    store.create(&a).await.unwrap();
    store.create(&b).await.unwrap();

    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
    let slow = {
        let store = store.clone();
        let mut body = Increment::new(&a.id);
        body.hold = Duration::from_secs(2);
        body.entered = Some(entered_tx);
        tokio::spawn(async move { store.run_transaction(&mut body).await })
    };
    entered_rx.await.unwrap();

    let started = Instant::now();
    let mut press_b = Increment::new(&b.id);
    store
        .run_transaction(&mut press_b)
        .await
        .expect("press on another link must commit");
    store
        .create(&sample("link-c"))
        .await
        .expect("create must not wait for link-a");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(store.get(&b.id).await.unwrap().unwrap().clicks, 1);
    assert!(store.get(&LinkId::new("link-c")).await.unwrap().is_some());

    slow.await.unwrap().unwrap();
    assert_eq!(store.get(&a.id).await.unwrap().unwrap().clicks, 1);
}

/// Reads, lets another store instance on the same file commit, then writes.
struct StaleWrite<'s> {
    id: LinkId,
    other: &'s SqliteLinkStore,
}

#[async_trait]
impl<'s> TransactionBody for StaleWrite<'s> {
    async fn run(&mut self, tx: &mut dyn LinkTransaction) -> Result<()> {
        let link = tx.read(&self.id).await?.expect("link exists");
        let mut meanwhile = Increment::new(&self.id);
        self.other.run_transaction(&mut meanwhile).await?;
        tx.write(&self.id, LinkPatch::clicks(link.clicks + 1)).await
    }
}

#[tokio::test]
async fn test_commit_detects_a_writer_from_another_process() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let other = open_store(&dir).await;
    let link = sample("shared");
    store.create(&link).await.unwrap();

    let mut body = StaleWrite {
        id: link.id.clone(),
        other: &other,
    };
    let err = store.run_transaction(&mut body).await.unwrap_err();
    assert!(matches!(err, Error::Contention(_)), "got {err:?}");

    // Only the other writer's increment landed.
    assert_eq!(store.get(&link.id).await.unwrap().unwrap().clicks, 1);
}

#[tokio::test]
async fn test_message_id_attached_during_a_press_is_kept() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;
    let link = sample("attach");
    store.create(&link).await.unwrap();

    struct AttachMidway<'s> {
        store: &'s SqliteLinkStore,
        id: LinkId,
    }

    #[async_trait]
    impl<'s> TransactionBody for AttachMidway<'s> {
        async fn run(&mut self, tx: &mut dyn LinkTransaction) -> Result<()> {
            let link = tx.read(&self.id).await?.expect("link exists");
            self.store
                .merge_update(&self.id, LinkPatch::message_id(MessageId(5)))
                .await?;
            tx.write(&self.id, LinkPatch::clicks(link.clicks + 1)).await
        }
    }

    let mut body = AttachMidway {
        store: &store,
        id: link.id.clone(),
    };
    store.run_transaction(&mut body).await.unwrap();

    let got = store.get(&link.id).await.unwrap().unwrap();
    assert_eq!(got.clicks, 1);
    assert_eq!(got.message_id, Some(MessageId(5)));
}

async fn track(handler: &CommandHandler, url: &str) -> TrackedLink {
    let msg = TextMessage {
        chat_id: ChatId(-100),
        text: format!("/track {url}"),
    };
    match handler.handle(&msg).await.expect("Failed to track link") {
        CommandOutcome::Tracked { link, attached } => {
            assert!(attached);
            link
        }
        other => panic!("expected a tracked link, got {other:?}"),
    }
}

fn press(link: &TrackedLink, callback_id: &str) -> CallbackQuery {
    CallbackQuery {
        callback_id: callback_id.to_string(),
        data: link.id.as_str().to_string(),
        message: link.message_ref(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_presses_edit_in_commit_order() {
    const N: u64 = 20;
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);
    let messenger = Arc::new(FakeMessenger::default());
    let handler = CommandHandler::new(store.clone(), messenger.clone(), "/track");
    let engine = Arc::new(ClickEngine::new(store.clone(), messenger.clone()));
    let link = track(&handler, "https://example.com").await;

    let mut tasks = Vec::new();
    for i in 0..N {
        let engine = engine.clone();
        let p = press(&link, &format!("cb-{i}"));
        tasks.push(tokio::spawn(async move { engine.handle(&p).await }));
    }
    for t in tasks {
        let outcome = t.await.unwrap().expect("press must commit");
        assert!(matches!(outcome, ClickOutcome::Counted { edited: true, .. }));
    }

    assert_eq!(store.get(&link.id).await.unwrap().unwrap().clicks, N);
    let labels: Vec<String> = (1..=N).map(render::counter_label).collect();
    assert_eq!(messenger.edit_labels(), labels);
    assert_eq!(messenger.answers().len(), N as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_edit_does_not_block_other_links_or_tracking() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store_with(&dir, impatient()).await);
    let messenger = Arc::new(FakeMessenger::default());
    let handler = CommandHandler::new(store.clone(), messenger.clone(), "/track");
    let engine = Arc::new(ClickEngine::new(store.clone(), messenger.clone()));

    let slow = track(&handler, "https://slow.example").await;
    let fast = track(&handler, "https://fast.example").await;
    messenger.delay_edits(slow.message_ref().unwrap(), Duration::from_secs(2));

    let pending = {
        let engine = engine.clone();
        let p = press(&slow, "slow");
        tokio::spawn(async move { engine.handle(&p).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let outcome = engine
        .handle(&press(&fast, "fast"))
        .await
        .expect("press on another link must commit");
    assert_eq!(
        outcome,
        ClickOutcome::Counted {
            clicks: 1,
            edited: true,
            acknowledged: true
        }
    );
    let third = track(&handler, "https://third.example").await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(store.get(&fast.id).await.unwrap().unwrap().clicks, 1);
    assert_eq!(store.get(&third.id).await.unwrap().unwrap().clicks, 0);

    let slow_outcome = pending.await.unwrap().unwrap();
    assert!(matches!(
        slow_outcome,
        ClickOutcome::Counted {
            clicks: 1,
            edited: true,
            ..
        }
    ));
    assert_eq!(store.get(&slow.id).await.unwrap().unwrap().clicks, 1);
}
