//! Text generation abstractions.
//!
//! - `Generator`: RPITIT trait for concrete generator implementations
//! - `BoxGenerator`: object-safe, cloneable wrapper for dynamic dispatch
//! - `extract`: pulling a JSON document out of free-form LLM output

pub mod box_generator;
pub mod extract;
pub mod generator;
