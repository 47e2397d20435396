//! Shared domain types for the stepwise workflow engine.
//!
//! This crate contains the data model used across the workspace: workflow
//! documents and execution results, persistent plans, tool descriptors,
//! generation requests, configuration, and shared error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod duration;
pub mod error;
pub mod llm;
pub mod plan;
pub mod tool;
pub mod workflow;
