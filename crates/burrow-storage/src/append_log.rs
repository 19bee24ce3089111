use crate::error::map_io_error;
use crate::journal::JournalEntry;
use crate::memory::{DeleteOutcome, InMemoryStorage};
use async_trait::async_trait;
use burrow_core::{
    LinkId, LinkRecord, Owner, ResolvedLink, Result, Shortened, Storage, StorageError,
    StorageStats,
};
use burrow_generator::{Generator, RandomGenerator};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What replaying a journal found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Lines that changed in-memory state.
    pub applied: usize,
    /// Lines that were malformed or did not apply.
    pub skipped: usize,
    /// Whether an unterminated trailing line was cut off.
    pub truncated_tail: bool,
}

/// [`InMemoryStorage`] made durable by an append-only journal file.
///
/// Every created link and every deletion performed by its owner is appended
/// as one line (see [`crate::journal`]). Opening the storage replays the
/// journal from the start. Lines that cannot be parsed or applied are
/// skipped with a warning rather than failing startup.
///
/// Journal appends are serialized by their own lock. Writers take it before
/// touching the in-memory tables, so the journal order always matches the
/// order in which changes became visible; readers never wait on file I/O.
pub struct AppendLogStorage<G = RandomGenerator> {
    memory: InMemoryStorage<G>,
    journal: Mutex<Option<Journal>>,
    closed: AtomicBool,
    path: PathBuf,
    report: ReplayReport,
}

impl AppendLogStorage<RandomGenerator> {
    /// Opens (creating if needed) the journal at `path` and replays it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_generator(path, RandomGenerator::new()).await
    }
}

impl<G> std::fmt::Debug for AppendLogStorage<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppendLogStorage")
            .field("path", &self.path)
            .field("report", &self.report)
            .finish_non_exhaustive()
    }
}

impl<G: Generator> AppendLogStorage<G> {
    pub async fn open_with_generator(path: impl AsRef<Path>, generator: G) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(map_io_error)?;

        let memory = InMemoryStorage::with_generator(generator);
        let report = replay(&mut file, &memory).await?;
        let len = file.metadata().await.map_err(map_io_error)?.len();

        info!(
            path = %path.display(),
            applied = report.applied,
            skipped = report.skipped,
            truncated_tail = report.truncated_tail,
            "journal replayed"
        );

        Ok(Self {
            memory,
            journal: Mutex::new(Some(Journal::new(file, len))),
            closed: AtomicBool::new(false),
            path,
            report,
        })
    }

    /// Returns the path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns what the replay at open time found.
    pub fn replay_report(&self) -> ReplayReport {
        self.report
    }
}

async fn replay<G>(file: &mut File, memory: &InMemoryStorage<G>) -> Result<ReplayReport> {
    let mut report = ReplayReport::default();
    let mut reader = BufReader::new(&mut *file);
    let mut line = Vec::new();
    let mut complete_len: u64 = 0;
    let mut line_no = 0usize;

    loop {
        line.clear();
        let read = reader
            .read_until(b'\n', &mut line)
            .await
            .map_err(map_io_error)?;
        if read == 0 {
            break;
        }
        line_no += 1;

        if line.last() != Some(&b'\n') {
            warn!(line = line_no, bytes = read, "journal ends with a partial line, discarding it");
            report.skipped += 1;
            report.truncated_tail = true;
            break;
        }
        complete_len += read as u64;
        line.pop();

        let Ok(text) = std::str::from_utf8(&line) else {
            warn!(line = line_no, "skipping journal line: not utf-8");
            report.skipped += 1;
            continue;
        };

        let entry = match JournalEntry::decode(text) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(line = line_no, error = %err, "skipping journal line");
                report.skipped += 1;
                continue;
            }
        };

        if apply(memory, entry, line_no) {
            report.applied += 1;
        } else {
            report.skipped += 1;
        }
    }

    drop(reader);
    if report.truncated_tail {
        file.set_len(complete_len).await.map_err(map_io_error)?;
    }

    Ok(report)
}

fn apply<G>(memory: &InMemoryStorage<G>, entry: JournalEntry, line_no: usize) -> bool {
    match entry {
        JournalEntry::New { id, owner, url } => {
            let restored = memory.restore_link(id.clone(), url, owner);
            if !restored {
                warn!(line = line_no, id = %id, "skipping NEW record: id or url already present");
            }
            restored
        }
        JournalEntry::Delete { id, owner } => match memory.mark_deleted(&id, owner) {
            DeleteOutcome::Deleted | DeleteOutcome::AlreadyDeleted => true,
            DeleteOutcome::NotFound => {
                warn!(line = line_no, id = %id, "skipping DELETE record: unknown id");
                false
            }
            DeleteOutcome::NotOwner => {
                warn!(line = line_no, id = %id, owner = %owner, "skipping DELETE record: owner mismatch");
                false
            }
        },
    }
}

/// The writable side of the journal.
#[async_trait]
trait JournalFile: AsyncWrite + Unpin + Send + Sync + 'static {
    async fn truncate(&mut self, len: u64) -> std::io::Result<()>;

    async fn sync(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl JournalFile for File {
    async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len).await
    }

    async fn sync(&mut self) -> std::io::Result<()> {
        self.sync_all().await
    }
}

/// Appends whole lines only.
///
/// A write that fails partway is cut back to the last complete line. If
/// that cut fails too, the journal refuses every further append.
struct Journal<F = File> {
    file: F,
    len: u64,
    broken: bool,
}

impl<F: JournalFile> Journal<F> {
    fn new(file: F, len: u64) -> Self {
        Self {
            file,
            len,
            broken: false,
        }
    }

    async fn append(&mut self, entry: &JournalEntry) -> std::io::Result<()> {
        if self.broken {
            return Err(std::io::Error::other(
                "journal holds a partial record and no longer accepts writes",
            ));
        }

        let line = entry.encode();
        let written = async {
            self.file.write_all(line.as_bytes()).await?;
            self.file.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(err) => {
                if let Err(cut) = self.file.truncate(self.len).await {
                    error!(error = %cut, len = self.len, "failed to cut journal back after a failed write");
                    self.broken = true;
                }
                Err(err)
            }
        }
    }

    async fn close(mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync().await
    }
}

#[async_trait]
impl<G: Generator> Storage for AppendLogStorage<G> {
    async fn add(&self, url: &str, owner: Owner) -> Result<Shortened> {
        let mut journal = self.journal.lock().await;
        let journal = journal.as_mut().ok_or(StorageError::Closed)?;

        let shortened = self.memory.insert_link(url, owner)?;
        let Shortened::Created(id) = &shortened else {
            return Ok(shortened);
        };

        let entry = JournalEntry::New {
            id: id.clone(),
            owner,
            url: url.to_owned(),
        };
        if let Err(err) = journal.append(&entry).await {
            self.memory.remove_link(id);
            error!(id = %id, error = %err, "failed to journal new link, rolled back");
            return Err(map_io_error(err));
        }

        Ok(shortened)
    }

    async fn get(&self, id: &LinkId) -> Result<ResolvedLink> {
        self.memory.lookup(id)
    }

    async fn links_by_owner(&self, owner: Owner) -> Result<Vec<LinkRecord>> {
        Ok(self.memory.owned_by(owner))
    }

    async fn delete_links(&self, ids: &[LinkId], owner: Owner) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let journal = journal.as_mut().ok_or(StorageError::Closed)?;

        for id in ids {
            if self.memory.mark_deleted(id, owner) != DeleteOutcome::Deleted {
                continue;
            }

            let entry = JournalEntry::Delete {
                id: id.clone(),
                owner,
            };
            match journal.append(&entry).await {
                Ok(()) => debug!(id = %id, owner = %owner, "link deleted"),
                Err(err) => error!(id = %id, error = %err, "failed to journal deletion"),
            }
        }

        Ok(())
    }

    async fn stats(&self) -> Result<StorageStats> {
        Ok(self.memory.counts())
    }

    async fn ping(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn close(&self) -> Result<()> {
        let mut journal = self.journal.lock().await;
        let Some(file) = journal.take() else {
            return Ok(());
        };
        self.closed.store(true, Ordering::Release);

        file.close().await.map_err(map_io_error)?;
        info!(path = %self.path.display(), "journal closed");
        Ok(())
    }
}
