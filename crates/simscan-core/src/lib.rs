//! Core types and contracts for the simscan similarity-detection pipeline.
//!
//! Provides the submission data model ([`types`]), canonical tokens
//! ([`token`]), fingerprints and comparison results ([`fingerprint`]),
//! the stored-value binary codec ([`codec`]), the stable error taxonomy
//! ([`error`]), and pipeline options with config-file loading ([`config`]).

pub mod codec;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod token;
pub mod types;
