//! Translate OpenAI Chat Completions requests into Gemini `generateContent` requests.
//!
//! Every message maps to exactly one Gemini `Content`, in order. Gemini has only
//! two conversational roles, so anything that is not `assistant` is sent as `user`.

use super::gemini_types::{
    Content, ContentRole, GenerateContentRequest, GenerationConfig, Part, SafetySetting,
};
use super::openai_types::{ChatCompletionRequest, ChatMessage};

/// Harm categories covered by the fixed safety policy.
const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

const PERMISSIVE_THRESHOLD: &str = "BLOCK_NONE";

/// Translate an OpenAI chat request into a Gemini generation request.
/// Pure and total: absent or zero-valued sampling options are left out.
pub fn openai_to_gemini(req: &ChatCompletionRequest) -> GenerateContentRequest {
    let contents = req.messages.iter().map(translate_message).collect();

    let generation_config = GenerationConfig {
        max_output_tokens: req.max_tokens.filter(|n| *n != 0),
        temperature: req.temperature.filter(is_truthy),
        top_p: req.top_p.filter(is_truthy),
        stop_sequences: req
            .stop
            .as_ref()
            .map(|s| s.to_vec())
            .filter(|v| !v.is_empty()),
    };

    GenerateContentRequest {
        contents,
        generation_config: (!generation_config.is_empty()).then_some(generation_config),
        safety_settings: safety_settings(),
    }
}

/// Zero and NaN are treated as "not set".
fn is_truthy(v: &f64) -> bool {
    *v != 0.0 && !v.is_nan()
}

fn translate_message(msg: &ChatMessage) -> Content {
    let text = msg
        .content
        .as_ref()
        .map(|c| c.as_text())
        .unwrap_or_default();

    Content {
        role: map_role(&msg.role),
        parts: vec![Part { text }],
    }
}

pub fn map_role(role: &str) -> ContentRole {
    match role {
        "assistant" => ContentRole::Model,
        _ => ContentRole::User,
    }
}

pub fn safety_settings() -> Vec<SafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: (*category).to_string(),
            threshold: PERMISSIVE_THRESHOLD.to_string(),
        })
        .collect()
}
