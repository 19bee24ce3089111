use crate::batcher::BatcherSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to pick and open a storage backend.
///
/// Precedence when opening: a non-empty `database_dsn` selects PostgreSQL,
/// otherwise a non-empty `file_storage_path` selects the append-log backend,
/// otherwise links live in memory only.
#[derive(Debug, Clone, Default, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[builder(default, setter(strip_option, into))]
    pub database_dsn: Option<String>,
    #[builder(default, setter(strip_option, into))]
    pub file_storage_path: Option<PathBuf>,
    #[builder(default)]
    pub postgres: PostgresSettings,
    #[builder(default)]
    pub batcher: BatcherSettings,
}

/// Connection pool and query tuning for the PostgreSQL backend.
#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresSettings {
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    /// Upper bound for a single query round-trip.
    #[builder(default = DEFAULT_QUERY_TIMEOUT)]
    pub query_timeout: Duration,
    /// Upper bound for the liveness probe.
    #[builder(default = DEFAULT_PING_TIMEOUT)]
    pub ping_timeout: Duration,
    #[builder(default = DEFAULT_ACQUIRE_TIMEOUT)]
    pub acquire_timeout: Duration,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
