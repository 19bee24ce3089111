use crate::batcher::{BatcherSettings, DeleteBatcher, DeleteRequest, DeleteSink};
use crate::config::PostgresSettings;
use crate::error::map_sqlx_error;
use crate::MAX_GENERATION_ATTEMPTS;
use async_trait::async_trait;
use burrow_core::{
    with_deadline, LinkId, LinkRecord, Owner, ResolvedLink, Result, Shortened, Storage,
    StorageError, StorageStats,
};
use burrow_generator::{Generator, RandomGenerator};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgPool, Row};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

static MIGRATOR: Migrator = sqlx::migrate!();

/// Name of the unique constraint on `links.url`.
const URL_CONSTRAINT: &str = "links_url_key";

/// PostgreSQL implementation of the [`Storage`] contract.
///
/// Id uniqueness is enforced by the primary key and URL uniqueness by the
/// `links_url_key` constraint, both server side. Deletions are handed to a
/// [`DeleteBatcher`] and applied in grouped `UPDATE`s, so `delete_links`
/// returns before the rows change.
pub struct PostgresStorage<G = RandomGenerator> {
    pool: PgPool,
    generator: G,
    settings: PostgresSettings,
    batcher: DeleteBatcher,
    closed: OnceCell<()>,
}

impl<G> std::fmt::Debug for PostgresStorage<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStorage")
            .field("pool", &self.pool)
            .field("settings", &self.settings)
            .field("batcher", &self.batcher)
            .finish_non_exhaustive()
    }
}

impl PostgresStorage<RandomGenerator> {
    /// Connects to `database_url`, applies pending migrations and starts the
    /// delete batcher.
    pub async fn connect(
        database_url: &str,
        settings: PostgresSettings,
        batcher: BatcherSettings,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)?;

        migrate(&pool).await?;
        Ok(Self::from_pool(pool, RandomGenerator::new(), settings, batcher))
    }
}

impl<G: Generator> PostgresStorage<G> {
    /// Creates a storage over an existing, already migrated pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_pool(
        pool: PgPool,
        generator: G,
        settings: PostgresSettings,
        batcher: BatcherSettings,
    ) -> Self {
        let sink = PgDeleteSink {
            pool: pool.clone(),
            query_timeout: settings.query_timeout,
        };

        Self {
            pool,
            generator,
            settings,
            batcher: DeleteBatcher::spawn(sink, batcher),
            closed: OnceCell::new(),
        }
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn existing_id(&self, url: &str) -> Result<LinkId> {
        let row = sqlx::query("SELECT id FROM links WHERE url = $1")
            .bind(url)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let id: String = row.try_get("id").map_err(map_sqlx_error)?;
        Ok(LinkId::new(id)?)
    }
}

/// Applies the embedded migrations. Already applied ones are skipped.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| StorageError::Unavailable(format!("migration failed: {e}")))?;
    debug!("links schema is up to date");
    Ok(())
}

fn is_url_conflict(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|db| {
        db.is_unique_violation() && db.constraint().map_or(true, |name| name == URL_CONSTRAINT)
    })
}

fn timed_out(what: &str, after: Duration) -> StorageError {
    StorageError::Timeout(format!("{what} did not finish within {after:?}"))
}

#[async_trait]
impl<G: Generator> Storage for PostgresStorage<G> {
    async fn add(&self, url: &str, owner: Owner) -> Result<Shortened> {
        let timeout = self.settings.query_timeout;

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let id = self.generator.generate()?;

            let insert = sqlx::query(
                r#"
                INSERT INTO links (id, url, user_id)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(id.as_str())
            .bind(url)
            .bind(owner.into_uuid())
            .execute(&self.pool);

            let outcome = tokio::time::timeout(timeout, insert)
                .await
                .map_err(|_| timed_out("insert", timeout))?;

            match outcome {
                Ok(done) if done.rows_affected() == 1 => {
                    debug!(id = %id, owner = %owner, "link stored");
                    return Ok(Shortened::Created(id));
                }
                Ok(_) => trace!(id = %id, "generated id collides, retrying"),
                Err(err) if is_url_conflict(&err) => {
                    let existing = with_deadline(timeout, self.existing_id(url)).await?;
                    trace!(id = %existing, "url already shortened");
                    return Ok(Shortened::Existing(existing));
                }
                Err(err) => return Err(map_sqlx_error(err)),
            }
        }

        Err(StorageError::Generation(format!(
            "no free id after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }

    async fn get(&self, id: &LinkId) -> Result<ResolvedLink> {
        let row = with_deadline(self.settings.query_timeout, async {
            sqlx::query("SELECT url, deleted FROM links WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)
        })
        .await?;

        let Some(row) = row else {
            trace!(id = %id, "link not found");
            return Err(StorageError::NotFound(id.clone()));
        };

        Ok(ResolvedLink {
            url: row.try_get("url").map_err(map_sqlx_error)?,
            deleted: row.try_get("deleted").map_err(map_sqlx_error)?,
        })
    }

    async fn links_by_owner(&self, owner: Owner) -> Result<Vec<LinkRecord>> {
        let rows = with_deadline(self.settings.query_timeout, async {
            sqlx::query(
                r#"
                SELECT id, url
                FROM links
                WHERE user_id = $1
                  AND deleted = FALSE
                ORDER BY id
                "#,
            )
            .bind(owner.into_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)
        })
        .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(map_sqlx_error)?;
                Ok(LinkRecord {
                    id: LinkId::new(id)?,
                    url: row.try_get("url").map_err(map_sqlx_error)?,
                    owner,
                    deleted: false,
                })
            })
            .collect()
    }

    async fn delete_links(&self, ids: &[LinkId], owner: Owner) -> Result<()> {
        self.batcher.enqueue_all(ids, owner)?;
        trace!(count = ids.len(), owner = %owner, "deletions queued");
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let row = with_deadline(self.settings.query_timeout, async {
            sqlx::query(
                "SELECT COUNT(id) AS links, COUNT(DISTINCT user_id) AS owners FROM links",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
        })
        .await?;

        let links: i64 = row.try_get("links").map_err(map_sqlx_error)?;
        let owners: i64 = row.try_get("owners").map_err(map_sqlx_error)?;

        Ok(StorageStats {
            links: links as u64,
            owners: owners as u64,
        })
    }

    async fn ping(&self) -> bool {
        let probe = async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok::<_, sqlx::Error>(())
        };

        match tokio::time::timeout(self.settings.ping_timeout, probe).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(error = %err, "database ping failed");
                false
            }
            Err(_) => {
                warn!(timeout = ?self.settings.ping_timeout, "database ping timed out");
                false
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // Overlapping callers wait here until the pending deletes are flushed
        // and the pool is gone.
        self.closed
            .get_or_init(|| async {
                self.batcher.shutdown().await;
                self.pool.close().await;
                info!("postgres storage closed");
            })
            .await;
        Ok(())
    }
}

/// Flips `deleted` for a whole batch with a single statement.
struct PgDeleteSink {
    pool: PgPool,
    query_timeout: Duration,
}

#[async_trait]
impl DeleteSink for PgDeleteSink {
    async fn apply(&self, batch: &[DeleteRequest]) -> Result<u64> {
        let ids: Vec<String> = batch.iter().map(|r| r.id.to_string()).collect();
        let owners: Vec<Uuid> = batch.iter().map(|r| r.owner.into_uuid()).collect();

        with_deadline(self.query_timeout, async move {
            sqlx::query(
                r#"
                UPDATE links
                SET deleted = TRUE
                FROM (SELECT UNNEST($1::text[]) AS id, UNNEST($2::uuid[]) AS user_id) AS batch
                WHERE links.id = batch.id
                  AND links.user_id = batch.user_id
                "#,
            )
            .bind(ids)
            .bind(owners)
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected())
            .map_err(map_sqlx_error)
        })
        .await
    }
}
