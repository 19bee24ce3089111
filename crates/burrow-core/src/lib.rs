//! Core types and traits for the burrow link storage engine.
//!
//! This crate defines the data model shared by all backends and the
//! [`Storage`] contract that HTTP and RPC layers program against.

pub mod error;
pub mod link;
pub mod storage;

pub use error::{CoreError, Result, StorageError};
pub use link::{LinkId, LinkRecord, Owner, ResolvedLink, Shortened, LINK_ID_ALPHABET, LINK_ID_LENGTH};
pub use storage::{with_deadline, Storage, StorageStats};
