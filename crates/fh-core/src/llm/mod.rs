//! LLM API client and types
//!
//! Supports Gemini, Claude and OpenAI-compatible APIs.

mod client;
mod types;

pub use client::{LlmClient, TextGenerator};
pub use types::*;
