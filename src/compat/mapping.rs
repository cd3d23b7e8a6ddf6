//! OpenAI chat-completion to upstream `generateContent` mapping.
//!
//! Every function here is pure; the handler owns all I/O.

use super::types::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, Content, GenerateContentRequest,
    GenerationConfig, Message, Part, Usage,
};

/// Upstream model used when the requested name is not recognised.
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// External model names and the upstream model they run on.
const MODEL_MAP: &[(&str, &str)] = &[
    ("gpt-4", "gemini-1.5-pro"),
    ("gpt-4-turbo", "gemini-1.5-pro"),
    ("gpt-4o", "gemini-1.5-pro"),
    ("gpt-3.5-turbo", "gemini-1.5-flash"),
    ("gpt-4o-mini", "gemini-1.5-flash"),
];

/// Resolve the upstream model for a requested model name.
pub fn map_model(requested: &str) -> &str {
    if let Some((_, upstream)) = MODEL_MAP.iter().find(|(name, _)| *name == requested) {
        return *upstream;
    }
    if requested.starts_with("gemini-") {
        return requested;
    }
    DEFAULT_MODEL
}

/// Upstream role for a chat role: `user` stays, everything else is `model`.
pub fn map_role(role: &str) -> &'static str {
    if role == "user" {
        "user"
    } else {
        "model"
    }
}

/// Build the upstream request body for a chat completion request.
pub fn to_generate_request(request: &ChatCompletionRequest) -> GenerateContentRequest {
    let contents = request
        .messages
        .iter()
        .map(|m| Content {
            role: map_role(&m.role).to_string(),
            parts: vec![Part {
                text: m.content.clone(),
            }],
        })
        .collect();

    let config = GenerationConfig {
        temperature: request.temperature,
        max_output_tokens: request.max_tokens,
        top_p: request.top_p,
        stop_sequences: request.stop.clone().map(|s| s.into_vec()),
    };

    GenerateContentRequest {
        contents,
        generation_config: (!config.is_empty()).then_some(config),
    }
}

/// Translate an upstream finish reason into the OpenAI vocabulary.
pub fn map_finish_reason(reason: Option<&str>) -> String {
    match reason {
        None | Some("STOP") | Some("FINISH_REASON_UNSPECIFIED") => "stop".to_string(),
        Some("MAX_TOKENS") => "length".to_string(),
        Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT")
        | Some("SPII") => "content_filter".to_string(),
        Some(other) => other.to_lowercase(),
    }
}

/// Concatenated text of the first candidate.
pub fn first_candidate_text(response: &serde_json::Value) -> String {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(|parts| parts.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Token counts from `usageMetadata`, zero when the upstream omits them.
pub fn usage_from_metadata(response: &serde_json::Value) -> Usage {
    let Some(meta) = response.get("usageMetadata") else {
        return Usage::default();
    };
    let count = |field: &str| {
        meta.get(field)
            .and_then(|v| v.as_u64())
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(0)
    };
    let prompt_tokens = count("promptTokenCount");
    let completion_tokens = count("candidatesTokenCount");
    let total_tokens = match count("totalTokenCount") {
        0 => prompt_tokens.saturating_add(completion_tokens),
        total => total,
    };
    Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

/// Wrap an upstream response into a chat completion envelope.
pub fn to_chat_completion(
    response: &serde_json::Value,
    requested_model: &str,
    id: String,
    created: u64,
) -> ChatCompletionResponse {
    let finish_reason = response
        .pointer("/candidates/0/finishReason")
        .and_then(|v| v.as_str());

    ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model: requested_model.to_string(),
        usage: usage_from_metadata(response),
        choices: vec![Choice {
            index: 0,
            message: Message {
                role: "assistant".to_string(),
                content: first_candidate_text(response),
                name: None,
            },
            finish_reason: Some(map_finish_reason(finish_reason)),
        }],
    }
}

/// Fresh completion identifier.
pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}
