//! ApiRelay - A small HTTP relay for remote JSON config feeds
//!
//! Provides:
//! - Pass-through proxying of arbitrary http(s) URLs (`/?url=...`)
//! - Fetching a remote JSON config document with optional rewriting of
//!   `api` endpoint fields to route through the relay (`/?format=...`)
//! - Optional base58 re-encoding of the document
//! - Health check endpoint

pub mod base58;
pub mod format;
pub mod rewrite;
pub mod server;

pub use format::{FormatPolicy, InvalidFormat, SourceRegistry};
pub use server::{RelayConfig, RelayServer};
