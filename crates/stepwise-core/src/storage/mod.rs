//! Storage traits: the `memory` tool's key-value store and the plan store.

pub mod kv_store;
pub mod plan_store;
