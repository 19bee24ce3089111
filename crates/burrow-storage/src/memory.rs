use crate::MAX_GENERATION_ATTEMPTS;
use async_trait::async_trait;
use burrow_core::{
    LinkId, LinkRecord, Owner, ResolvedLink, Result, Shortened, Storage, StorageError,
    StorageStats,
};
use burrow_generator::{Generator, RandomGenerator};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Entry {
    url: String,
    owner: Owner,
    deleted: bool,
}

/// The id table and the url index. Always mutated together.
#[derive(Debug, Default)]
struct Tables {
    by_id: HashMap<LinkId, Entry>,
    by_url: HashMap<String, LinkId>,
}

/// Result of flipping the deleted flag on a single id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
    NotFound,
    NotOwner,
}

/// In-memory implementation of the [`Storage`] contract.
///
/// Both maps sit behind a single `RwLock`: lookups share the read lock,
/// inserts and deletes take the write lock. Nothing is persisted.
pub struct InMemoryStorage<G = RandomGenerator> {
    tables: RwLock<Tables>,
    generator: G,
}

impl InMemoryStorage<RandomGenerator> {
    /// Creates an empty storage drawing ids from the OS random source.
    pub fn new() -> Self {
        Self::with_generator(RandomGenerator::new())
    }
}

impl Default for InMemoryStorage<RandomGenerator> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G> std::fmt::Debug for InMemoryStorage<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStorage")
            .field("links", &self.tables.read().by_id.len())
            .finish_non_exhaustive()
    }
}

impl<G: Generator> InMemoryStorage<G> {
    pub fn with_generator(generator: G) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            generator,
        }
    }

    pub(crate) fn insert_link(&self, url: &str, owner: Owner) -> Result<Shortened> {
        let mut tables = self.tables.write();

        if let Some(existing) = tables.by_url.get(url) {
            trace!(id = %existing, "url already shortened");
            return Ok(Shortened::Existing(existing.clone()));
        }

        let id = self.free_id(&tables)?;
        tables.by_url.insert(url.to_owned(), id.clone());
        tables.by_id.insert(
            id.clone(),
            Entry {
                url: url.to_owned(),
                owner,
                deleted: false,
            },
        );

        debug!(id = %id, owner = %owner, "link stored");
        Ok(Shortened::Created(id))
    }

    fn free_id(&self, tables: &Tables) -> Result<LinkId> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let candidate = self.generator.generate()?;
            if !tables.by_id.contains_key(&candidate) {
                return Ok(candidate);
            }
            trace!(id = %candidate, "generated id collides, retrying");
        }

        Err(StorageError::Generation(format!(
            "no free id after {} attempts",
            MAX_GENERATION_ATTEMPTS
        )))
    }
}

impl<G> InMemoryStorage<G> {
    /// Re-inserts a record read back from durable storage.
    ///
    /// Refuses (returns `false`) when either the id or the url is already
    /// mapped, so the two maps never disagree.
    pub(crate) fn restore_link(&self, id: LinkId, url: String, owner: Owner) -> bool {
        let mut tables = self.tables.write();

        if tables.by_id.contains_key(&id) || tables.by_url.contains_key(&url) {
            return false;
        }

        tables.by_url.insert(url.clone(), id.clone());
        tables.by_id.insert(
            id,
            Entry {
                url,
                owner,
                deleted: false,
            },
        );
        true
    }

    /// Drops a record that was never made durable.
    pub(crate) fn remove_link(&self, id: &LinkId) {
        let mut tables = self.tables.write();

        if let Some(entry) = tables.by_id.remove(id) {
            tables.by_url.remove(&entry.url);
        }
    }

    pub(crate) fn mark_deleted(&self, id: &LinkId, owner: Owner) -> DeleteOutcome {
        let mut tables = self.tables.write();

        match tables.by_id.get_mut(id) {
            None => DeleteOutcome::NotFound,
            Some(entry) if entry.owner != owner => DeleteOutcome::NotOwner,
            Some(entry) if entry.deleted => DeleteOutcome::AlreadyDeleted,
            Some(entry) => {
                entry.deleted = true;
                DeleteOutcome::Deleted
            }
        }
    }

    pub(crate) fn lookup(&self, id: &LinkId) -> Result<ResolvedLink> {
        let tables = self.tables.read();

        match tables.by_id.get(id) {
            Some(entry) => Ok(ResolvedLink {
                url: entry.url.clone(),
                deleted: entry.deleted,
            }),
            None => {
                trace!(id = %id, "link not found");
                Err(StorageError::NotFound(id.clone()))
            }
        }
    }

    pub(crate) fn owned_by(&self, owner: Owner) -> Vec<LinkRecord> {
        let tables = self.tables.read();

        let mut links: Vec<LinkRecord> = tables
            .by_id
            .iter()
            .filter(|(_, entry)| entry.owner == owner && !entry.deleted)
            .map(|(id, entry)| LinkRecord {
                id: id.clone(),
                url: entry.url.clone(),
                owner,
                deleted: false,
            })
            .collect();

        links.sort_by(|a, b| a.id.cmp(&b.id));
        links
    }

    pub(crate) fn counts(&self) -> StorageStats {
        let tables = self.tables.read();

        let owners: HashSet<Owner> = tables.by_id.values().map(|entry| entry.owner).collect();

        StorageStats {
            links: tables.by_id.len() as u64,
            owners: owners.len() as u64,
        }
    }
}

#[async_trait]
impl<G: Generator> Storage for InMemoryStorage<G> {
    async fn add(&self, url: &str, owner: Owner) -> Result<Shortened> {
        self.insert_link(url, owner)
    }

    async fn get(&self, id: &LinkId) -> Result<ResolvedLink> {
        self.lookup(id)
    }

    async fn links_by_owner(&self, owner: Owner) -> Result<Vec<LinkRecord>> {
        Ok(self.owned_by(owner))
    }

    async fn delete_links(&self, ids: &[LinkId], owner: Owner) -> Result<()> {
        for id in ids {
            let outcome = self.mark_deleted(id, owner);
            trace!(id = %id, owner = %owner, ?outcome, "delete requested");
        }
        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        Ok(self.counts())
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
