//! Activity logging: a background thread appending JSONL records with graceful degradation.

pub mod activity;
pub mod jsonl;
