//! Link storage backends.
//!
//! Three implementations of [`burrow_core::Storage`] live here:
//!
//! - [`InMemoryStorage`]: process-local tables, lost on exit.
//! - [`AppendLogStorage`]: the in-memory tables plus a replayable journal file.
//! - [`PostgresStorage`]: a `links` table, with deletions applied in batches
//!   by a [`DeleteBatcher`].
//!
//! [`open_storage`] picks one from a [`StorageConfig`].

pub mod append_log;
pub mod batcher;
pub mod config;
mod error;
pub mod journal;
pub mod memory;
pub mod postgres;
pub mod selector;

/// How many generated ids a single `add` may try before giving up.
pub const MAX_GENERATION_ATTEMPTS: usize = 64;

pub use append_log::{AppendLogStorage, ReplayReport};
pub use batcher::{BatcherSettings, DeleteBatcher, DeleteRequest, DeleteSink};
pub use config::{PostgresSettings, StorageConfig};
pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;
pub use selector::{open_storage, StorageKind};

pub use burrow_core::{Result, Storage, StorageError};
