//! Boundary client for the external context engine.
//!
//! The engine owns the vector store and the LLM; this crate owns nothing but
//! the wire contract: batched index uploads, formatted `search` output,
//! `search_and_ask(context, prompt) -> text`, a state snapshot for local
//! persistence, and a health probe. Offline policy is enforced at
//! construction time.

pub mod client;
pub mod config;
pub mod errors;

pub use client::{EngineClient, FileBlob, FixedEngine, HttpEngine};
pub use config::{EngineConfig, is_local_url};
pub use errors::EngineError;
