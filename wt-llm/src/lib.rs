//! BYO-key LLM client used by the action decider.
//!
//! Pure HTTP client: one non-streaming chat call per request, OpenAI or Anthropic
//! selected from the model name.

mod anthropic;
mod client;
mod error;
mod openai;
mod types;

pub use client::{LlmClient, Provider};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, ResponseFormat, Role, Usage};
