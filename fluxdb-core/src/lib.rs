//! FluxDB Core - In-Memory Document Database Engine
//!
//! A document-oriented database with durable persistence. Each named
//! database is a [`Collection`] of JSON-like documents keyed by an
//! auto-incrementing 64-bit id.
//!
//! # Architecture
//!
//! - **WAL (Write-Ahead Log)**: every mutation is logged and flushed
//!   before it becomes visible to readers
//! - **Snapshot**: point-in-time serialization that terminates WAL replay
//! - **Secondary indexes**: hash (equality) and sorted (range) multimaps
//!   per field, with adaptive promotion of hot scan fields
//! - **TTL**: per-document deadlines swept by a background worker
//! - **Pub/Sub**: channel fan-out to connected subscribers

pub mod codec;
pub mod collection;
pub mod expiry;
pub mod index;
pub mod manager;
pub mod persistence;
pub mod pubsub;
pub mod query;
pub mod storage;

mod error;
mod types;

pub use collection::{Collection, CollectionStats, MAX_WAL_SIZE};
pub use error::{FluxError, Result};
pub use types::*;

/// FluxDB version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
