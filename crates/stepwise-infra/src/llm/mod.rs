//! LLM provider implementations.
//!
//! - `openai_compat`: any OpenAI-compatible chat completions endpoint

pub mod openai_compat;
