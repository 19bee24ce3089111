use crate::append_log::AppendLogStorage;
use crate::config::StorageConfig;
use crate::memory::InMemoryStorage;
use crate::postgres::PostgresStorage;
use burrow_core::{Result, Storage};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// The backend a [`StorageConfig`] resolves to.
#[derive(Clone, PartialEq, Eq)]
pub enum StorageKind {
    InMemory,
    AppendLog(PathBuf),
    Postgres(String),
}

impl StorageKind {
    /// Picks a backend: a non-empty DSN wins over a non-empty file path,
    /// and with neither set links are kept in memory.
    pub fn from_config(config: &StorageConfig) -> Self {
        if let Some(dsn) = config.database_dsn.as_deref().filter(|dsn| !dsn.is_empty()) {
            return StorageKind::Postgres(dsn.to_string());
        }

        match config.file_storage_path.as_ref() {
            Some(path) if !path.as_os_str().is_empty() => StorageKind::AppendLog(path.clone()),
            _ => StorageKind::InMemory,
        }
    }
}

// The DSN may carry credentials, so neither impl prints it.
impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::InMemory => f.write_str("in-memory"),
            StorageKind::AppendLog(path) => write!(f, "append-log ({})", path.display()),
            StorageKind::Postgres(_) => f.write_str("postgres"),
        }
    }
}

impl fmt::Debug for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Opens the backend selected by `config`.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    let kind = StorageKind::from_config(config);
    info!(storage = %kind, "opening link storage");

    let storage: Arc<dyn Storage> = match kind {
        StorageKind::InMemory => Arc::new(InMemoryStorage::new()),
        StorageKind::AppendLog(path) => Arc::new(AppendLogStorage::open(path).await?),
        StorageKind::Postgres(dsn) => Arc::new(
            PostgresStorage::connect(&dsn, config.postgres.clone(), config.batcher.clone())
                .await?,
        ),
    };

    Ok(storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::Owner;

    #[test]
    fn dsn_takes_precedence() {
        let config = StorageConfig::builder()
            .database_dsn("postgres://u:secret@db/links")
            .file_storage_path("/tmp/links.log")
            .build();

        let kind = StorageKind::from_config(&config);
        assert_eq!(
            kind,
            StorageKind::Postgres("postgres://u:secret@db/links".to_string())
        );
        assert_eq!(kind.to_string(), "postgres");
        assert!(!format!("{kind:?}").contains("secret"));
    }

    #[test]
    fn empty_dsn_falls_through_to_file() {
        let config = StorageConfig::builder()
            .database_dsn("")
            .file_storage_path("/tmp/links.log")
            .build();

        assert_eq!(
            StorageKind::from_config(&config),
            StorageKind::AppendLog(PathBuf::from("/tmp/links.log"))
        );
    }

    #[test]
    fn nothing_configured_means_memory() {
        assert_eq!(
            StorageKind::from_config(&StorageConfig::default()),
            StorageKind::InMemory
        );

        let config = StorageConfig::builder().file_storage_path("").build();
        assert_eq!(StorageKind::from_config(&config), StorageKind::InMemory);
    }

    #[tokio::test]
    async fn opens_memory_backend() {
        let storage = open_storage(&StorageConfig::default()).await.unwrap();
        let owner = Owner::random();

        let id = storage.add("https://example.com", owner).await.unwrap().into_id();
        assert_eq!(storage.get(&id).await.unwrap().url, "https://example.com");
        assert!(storage.ping().await);
    }

    #[tokio::test]
    async fn opens_append_log_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.log");
        let config = StorageConfig::builder().file_storage_path(path.clone()).build();

        let storage = open_storage(&config).await.unwrap();
        storage
            .add("https://example.com", Owner::random())
            .await
            .unwrap();
        storage.close().await.unwrap();

        let journal = std::fs::read_to_string(&path).unwrap();
        assert!(journal.starts_with("NEW,"));
    }
}
