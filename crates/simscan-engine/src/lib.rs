//! The simscan similarity-detection pipeline.
//!
//! [`pipeline::run_pipeline`] drives one submission end to end:
//! acquisition ([`acquire`]), structural validation ([`rules`]),
//! tokenization (via `simscan-tokenize`), winnowing ([`fingerprint`]),
//! storage (via `simscan-store`), and pairwise comparison against the
//! step's prior submissions ([`compare`]).

pub mod acquire;
pub mod compare;
pub mod fingerprint;
pub mod pipeline;
pub mod rules;

pub use pipeline::{ResultHandle, run_pipeline};
pub use rules::RuleSpec;
