//! Infrastructure layer for stepwise.
//!
//! Implements the capability traits defined in `stepwise-core` against the
//! real world: `tokio::fs`, `reqwest`, the system clock, plan files on disk
//! and an OpenAI-compatible LLM endpoint. [`engine::Engine`] wires them
//! together.

pub mod clock;
pub mod config;
pub mod engine;
pub mod filesystem;
pub mod http;
pub mod llm;
pub mod plan_store;
