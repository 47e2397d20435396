//! Workflow execution core for stepwise.
//!
//! This crate defines the capability traits ("ports") that the infrastructure
//! layer implements, together with everything that runs on top of them: the
//! template engine, the built-in tools, the DAG scheduler and the persistent
//! planner. It depends only on `stepwise-types` -- never on
//! `stepwise-infra` or any network/disk crate.

pub mod llm;
pub mod planner;
pub mod service;
pub mod storage;
pub mod template;
pub mod tools;
pub mod workflow;
