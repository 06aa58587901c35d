//! Durable fingerprint storage.
//!
//! One embedded KV database per store directory, holding fingerprint
//! sets, optional token streams, similarity results, and a per-step
//! submission index. Writes for one submission happen inside one
//! transaction; a failed write leaves the store unchanged.

pub mod keys;
mod kv;
pub mod store;
pub mod version;

pub use kv::{KvEngine, KvTransaction};
pub use store::{FingerprintStore, MigrationReport, StoreStats};
pub use version::schema_version;

use simscan_core::codec::CodecError;

/// Store failures. Write failures are fatal to a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("kv engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored value at {key} failed to decode: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error(
        "store schema version mismatch: found {found:?}, expected {expected:?}; \
         run `simscan migrate` or point at a fresh store directory"
    )]
    VersionMismatch { found: String, expected: String },

    #[error("store lock poisoned")]
    Poisoned,
}
