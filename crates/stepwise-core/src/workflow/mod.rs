//! Workflow engine: definition parsing, dependency analysis, scheduling.
//!
//! - `definition` -- JSON/YAML parsing and structural validation
//! - `dag` -- implicit + explicit dependency graph, waves, cycle reporting
//! - `store` -- per-execution variable store
//! - `retry` -- retry policy resolution and backoff
//! - `step_runner` -- runs one step (render, invoke, retry, bind outputs)
//! - `executor` -- ready-set parallel scheduler
//! - `generate` -- LLM-authored workflow documents

pub mod dag;
pub mod definition;
pub mod executor;
pub mod generate;
pub mod retry;
pub mod step_runner;
pub mod store;
