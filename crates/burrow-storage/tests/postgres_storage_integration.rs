use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use burrow_core::{LinkId, Owner, Shortened, Storage, StorageError};
use burrow_generator::{Generator, GeneratorError};
use burrow_storage::postgres::migrate;
use burrow_storage::{BatcherSettings, PostgresSettings, PostgresStorage};
use burrow_test_infra::postgres::{PostgresConfig, PostgresServer};
use sqlx::postgres::PgPoolOptions;

const BATCH_TIMEOUT: Duration = Duration::from_millis(200);

struct Fixture {
    postgres: PostgresServer,
    storage: PostgresStorage,
}

impl Fixture {
    async fn start() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let postgres = PostgresServer::new(PostgresConfig::builder().build())
            .await
            .expect("start postgres");
        let url = postgres.database_url().await.expect("postgres url");
        let storage = connect_with_retry(&url).await;

        Self {
            postgres,
            storage,
        }
    }
}

async fn connect_with_retry(url: &str) -> PostgresStorage {
    let mut last_error = None;

    for _ in 0..20 {
        let batcher = BatcherSettings::builder()
            .idle_timeout(BATCH_TIMEOUT)
            .build();

        match PostgresStorage::connect(url, PostgresSettings::default(), batcher).await {
            Ok(storage) => return storage,
            Err(err) => {
                last_error = Some(err);
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }

    panic!("failed to connect postgres: {last_error:?}");
}

/// Hands out a fixed list of ids, then fails.
struct ScriptedGenerator {
    ids: Mutex<VecDeque<&'static str>>,
}

impl ScriptedGenerator {
    fn new(ids: &[&'static str]) -> Self {
        Self {
            ids: Mutex::new(ids.iter().copied().collect()),
        }
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self) -> Result<LinkId, GeneratorError> {
        let next = self.ids.lock().unwrap().pop_front();
        next.map(LinkId::new_unchecked)
            .ok_or_else(|| GeneratorError::Entropy("script exhausted".to_string()))
    }
}

async fn scripted_storage(url: &str, ids: &[&'static str]) -> PostgresStorage<ScriptedGenerator> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(url)
        .await
        .expect("connect postgres");
    migrate(&pool).await.expect("migrate");

    let batcher = BatcherSettings::builder()
        .idle_timeout(BATCH_TIMEOUT)
        .build();
    PostgresStorage::from_pool(
        pool,
        ScriptedGenerator::new(ids),
        PostgresSettings::default(),
        batcher,
    )
}

/// Waits until queued deletions have had time to be flushed.
async fn settle() {
    tokio::time::sleep(BATCH_TIMEOUT * 5).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn add_then_get() {
    let fixture = Fixture::start().await;
    let owner = Owner::random();

    let shortened = fixture
        .storage
        .add("https://example.com", owner)
        .await
        .unwrap();
    assert!(matches!(shortened, Shortened::Created(_)));

    let got = fixture.storage.get(shortened.id()).await.unwrap();
    assert_eq!(got.url, "https://example.com");
    assert!(!got.deleted);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn same_url_returns_existing_id() {
    let fixture = Fixture::start().await;

    let first = fixture
        .storage
        .add("https://example.com", Owner::random())
        .await
        .unwrap();
    let second = fixture
        .storage
        .add("https://example.com", Owner::random())
        .await
        .unwrap();

    assert!(second.already_existed());
    assert_eq!(first.id(), second.id());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn get_unknown_id_is_not_found() {
    let fixture = Fixture::start().await;
    let id = LinkId::new("zzzzz").unwrap();

    let err = fixture.storage.get(&id).await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound(missing) if missing == id));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn delete_applies_only_to_owner() {
    let fixture = Fixture::start().await;
    let alice = Owner::random();
    let bob = Owner::random();

    let mine = fixture
        .storage
        .add("https://alice.example", alice)
        .await
        .unwrap()
        .into_id();
    let theirs = fixture
        .storage
        .add("https://bob.example", bob)
        .await
        .unwrap()
        .into_id();

    fixture
        .storage
        .delete_links(&[mine.clone(), theirs.clone()], alice)
        .await
        .unwrap();
    settle().await;

    assert!(fixture.storage.get(&mine).await.unwrap().deleted);
    assert!(!fixture.storage.get(&theirs).await.unwrap().deleted);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn links_by_owner_skips_deleted() {
    let fixture = Fixture::start().await;
    let owner = Owner::random();

    let mut ids = Vec::new();
    for url in ["https://a.example", "https://b.example", "https://c.example"] {
        ids.push(fixture.storage.add(url, owner).await.unwrap().into_id());
    }

    fixture
        .storage
        .delete_links(&ids[..1], owner)
        .await
        .unwrap();
    settle().await;

    let listed = fixture.storage.links_by_owner(owner).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|link| link.owner == owner && !link.deleted));
    assert!(listed.iter().all(|link| link.id != ids[0]));
    assert!(listed.windows(2).all(|pair| pair[0].id < pair[1].id));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn stats_count_rows_and_owners() {
    let fixture = Fixture::start().await;
    let alice = Owner::random();
    let bob = Owner::random();

    fixture.storage.add("https://1.example", alice).await.unwrap();
    fixture.storage.add("https://2.example", alice).await.unwrap();
    fixture.storage.add("https://3.example", bob).await.unwrap();

    let stats = fixture.storage.stats().await.unwrap();
    assert_eq!(stats.links, 3);
    assert_eq!(stats.owners, 2);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn close_rejects_further_deletes() {
    let fixture = Fixture::start().await;
    let owner = Owner::random();
    let id = fixture
        .storage
        .add("https://example.com", owner)
        .await
        .unwrap()
        .into_id();

    assert!(fixture.storage.ping().await);
    fixture
        .storage
        .delete_links(std::slice::from_ref(&id), owner)
        .await
        .unwrap();

    let pool = fixture.storage.pool().clone();
    fixture.storage.close().await.unwrap();
    assert!(!fixture.storage.ping().await);
    assert!(pool.is_closed());

    let err = fixture
        .storage
        .delete_links(std::slice::from_ref(&id), owner)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Closed));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn colliding_id_is_regenerated() {
    let fixture = Fixture::start().await;
    let url = fixture.postgres.database_url().await.unwrap();
    let storage = scripted_storage(&url, &["aaaaa", "aaaaa", "bbbbb"]).await;
    let owner = Owner::random();

    let first = storage.add("https://one.example", owner).await.unwrap();
    let second = storage.add("https://two.example", owner).await.unwrap();

    assert_eq!(first, Shortened::Created(LinkId::new_unchecked("aaaaa")));
    assert_eq!(second, Shortened::Created(LinkId::new_unchecked("bbbbb")));
    assert_eq!(
        storage.get(second.id()).await.unwrap().url,
        "https://two.example"
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn deleted_url_still_dedups() {
    let fixture = Fixture::start().await;
    let owner = Owner::random();

    let id = fixture
        .storage
        .add("https://example.com", owner)
        .await
        .unwrap()
        .into_id();
    fixture
        .storage
        .delete_links(std::slice::from_ref(&id), owner)
        .await
        .unwrap();
    settle().await;
    assert!(fixture.storage.get(&id).await.unwrap().deleted);

    let again = fixture
        .storage
        .add("https://example.com", Owner::random())
        .await
        .unwrap();
    assert_eq!(again, Shortened::Existing(id));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn overlapping_closes_flush_pending_deletes() {
    let fixture = Fixture::start().await;
    let owner = Owner::random();
    let id = fixture
        .storage
        .add("https://example.com", owner)
        .await
        .unwrap()
        .into_id();
    fixture
        .storage
        .delete_links(std::slice::from_ref(&id), owner)
        .await
        .unwrap();

    let (first, second) = tokio::join!(fixture.storage.close(), fixture.storage.close());
    first.unwrap();
    second.unwrap();

    let url = fixture.postgres.database_url().await.unwrap();
    let storage = scripted_storage(&url, &[]).await;
    assert!(storage.get(&id).await.unwrap().deleted);
}
