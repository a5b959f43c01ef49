//! Logging adapters.

mod jsonl;

pub use jsonl::JsonlTranscriptLogger;
