use crate::error::{Result, StorageError};
use crate::link::{LinkId, LinkRecord, Owner, ResolvedLink, Shortened};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Aggregate counters over the whole data set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Number of stored links, deleted ones included.
    pub links: u64,
    /// Number of distinct owners across all stored links.
    pub owners: u64,
}

/// The persistence contract shared by every backend.
///
/// All backends behave identically from the caller's point of view, with
/// one documented exception: `delete_links` may return before the deletion
/// is applied (the relational backend hands it to a background batcher).
///
/// Cancellation follows the usual async rule: dropping a returned future
/// abandons the operation. Use [`with_deadline`] to bound a call.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Stores `url` for `owner` under a freshly generated id.
    ///
    /// If the URL is already stored (by anyone, deleted or not) nothing is
    /// written and the existing id comes back as [`Shortened::Existing`].
    async fn add(&self, url: &str, owner: Owner) -> Result<Shortened>;

    /// Shortens several URLs for one owner, in order.
    ///
    /// Each URL gets its own result; one failure does not stop the rest.
    async fn add_batch(&self, urls: &[String], owner: Owner) -> Vec<Result<Shortened>> {
        let mut results = Vec::with_capacity(urls.len());
        for url in urls {
            results.push(self.add(url, owner).await);
        }
        results
    }

    /// Looks up an id. Returns `Err(NotFound)` for unknown ids.
    async fn get(&self, id: &LinkId) -> Result<ResolvedLink>;

    /// Every non-deleted link of `owner`. Empty when there are none.
    async fn links_by_owner(&self, owner: Owner) -> Result<Vec<LinkRecord>>;

    /// Requests soft deletion of `ids` on behalf of `owner`.
    ///
    /// Ids that are unknown or belong to someone else are skipped silently.
    async fn delete_links(&self, ids: &[LinkId], owner: Owner) -> Result<()>;

    /// Counts links and distinct owners.
    async fn stats(&self) -> Result<StorageStats>;

    /// Liveness probe.
    async fn ping(&self) -> bool;

    /// Releases the backend's resources, flushing pending background work
    /// within a bounded wait. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;
}

/// Runs a storage operation under a caller-supplied deadline.
///
/// If `deadline` elapses first the operation is dropped and
/// [`StorageError::Timeout`] is returned.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(format!(
            "deadline of {:?} exceeded",
            deadline
        ))),
    }
}
