//! Retrieval surface over the external engine: cached semantic search,
//! policy-checked file reads, and token-budgeted context bundles.

pub mod bundler;
pub mod errors;
pub mod parser;
pub mod service;
pub mod snippet;
pub mod types;

pub use bundler::ContextBundler;
pub use errors::RetrievalError;
pub use parser::parse_engine_output;
pub use service::RetrievalService;
pub use types::{
    BundleMetadata, BundleOptions, CodeType, ContextBundle, FileContext, MatchType, SearchResult,
    Snippet, estimate_tokens,
};
