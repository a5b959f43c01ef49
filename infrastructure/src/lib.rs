//! Infrastructure layer for Conclave
//!
//! Adapters behind the application ports: the in-memory store with its
//! per-meeting locks and monotone event log, the routing LLM gateway with
//! the deterministic mock provider and HTTP adapters, the event bus with
//! replay, the JSONL transcript logger, TOML configuration loading, and the
//! runtime binder that wires one process together.

pub mod config;
pub mod event_bus;
pub mod gateway;
pub mod logging;
pub mod runtime;
pub mod store;

pub use config::{ConfigLoader, FileConfig};
pub use event_bus::{EventBus, Subscription};
pub use gateway::{
    anthropic::AnthropicAdapter, mock::MockProvider, mock::MockStyle, openai::OpenAiCompatAdapter,
    routing::RoutingGateway, ProviderAdapter,
};
pub use logging::JsonlTranscriptLogger;
pub use runtime::{Runtime, RuntimeError};
pub use store::memory::InMemoryStore;
