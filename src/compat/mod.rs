//! OpenAI-compatible chat completions on top of the upstream API.
//!
//! Accepts `{model, messages, temperature?, max_tokens?}` and answers with a
//! `chat.completion` envelope built from the upstream's first candidate.

pub mod mapping;
pub mod types;

pub use mapping::{map_model, to_chat_completion, to_generate_request};
pub use types::{ChatCompletionRequest, ChatCompletionResponse, Message};
