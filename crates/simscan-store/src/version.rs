//! Store schema versioning.
//!
//! The winnowing parameters and the token/value encodings all shape the
//! persisted bytes, so they are folded into one version string. It lives
//! twice: in a `VERSION` sentinel file at the store directory root (so
//! tooling can inspect a store without opening the database) and under a
//! sentinel key inside the database (so a copied database file cannot
//! drift from its directory).

use simscan_core::codec::CODEC_VERSION;

/// Database file inside the store directory.
pub const DB_FILE: &str = "store.db";

/// Sentinel file at the store directory root.
pub const VERSION_FILE: &str = "VERSION";

/// Schema version string for the given winnowing parameters.
pub fn schema_version(k_gram_size: usize, window_size: usize) -> String {
    format!("simscan/{CODEC_VERSION}/k{k_gram_size}/w{window_size}")
}
