use super::gemini_types::{GeminiErrorResponse, GenerateContentResponse};
use super::openai_types::{
    ChatCompletionResponse, ChatErrorResponse, ChatUsage, Choice, ChoiceMessage,
};

/// What to do when the backend produces no usable text.
///
/// With `empty_content_fallback` set, empty or whitespace-only replies are
/// replaced by the placeholder so the client always sees some content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentPolicy {
    pub empty_content_fallback: Option<String>,
}

impl ContentPolicy {
    pub fn with_fallback(placeholder: impl Into<String>) -> Self {
        Self {
            empty_content_fallback: Some(placeholder.into()),
        }
    }

    pub fn apply(&self, text: String) -> String {
        match self.empty_content_fallback {
            Some(ref placeholder) if text.trim().is_empty() => placeholder.clone(),
            _ => text,
        }
    }
}

/// `candidates[0].content.parts[0].text`, or `""` if any link is missing.
pub fn extract_text(resp: &GenerateContentResponse) -> &str {
    resp.candidates
        .first()
        .and_then(|c| c.content.as_ref())
        .and_then(|c| c.parts.first())
        .and_then(|p| p.text.as_deref())
        .unwrap_or("")
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Translate a Gemini response into an OpenAI chat completion.
/// Pure apart from the generated id and timestamp.
pub fn gemini_to_openai(
    resp: &GenerateContentResponse,
    model: &str,
    policy: &ContentPolicy,
) -> ChatCompletionResponse {
    let content = policy.apply(extract_text(resp).to_string());

    let usage = resp
        .usage_metadata
        .as_ref()
        .map_or_else(ChatUsage::default, |u| ChatUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

    ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: "stop".to_string(),
        }],
        usage,
    }
}

/// Map a Gemini error status onto the closest OpenAI error type
pub fn map_error_status(status: Option<&str>) -> &'static str {
    match status {
        Some("INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "NOT_FOUND") => "invalid_request_error",
        Some("UNAUTHENTICATED" | "PERMISSION_DENIED") => "authentication_error",
        Some("RESOURCE_EXHAUSTED") => "rate_limit_error",
        _ => "api_error",
    }
}

/// Translate a Gemini error into an OpenAI error response carrying the backend status
pub fn gemini_error_to_openai(err: &GeminiErrorResponse, status: u16) -> ChatErrorResponse {
    ChatErrorResponse::new(
        map_error_status(err.error.status.as_deref()),
        &err.error.message,
        Some(status),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::gemini_types::*;

    fn make_response(text: Option<&str>, usage: Option<UsageMetadata>) -> GenerateContentResponse {
        GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(CandidateContent {
                    parts: vec![CandidatePart {
                        text: text.map(String::from),
                    }],
                }),
            }],
            usage_metadata: usage,
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(
            Some("hello"),
            Some(UsageMetadata {
                prompt_token_count: 10,
                candidates_token_count: 20,
                total_token_count: 30,
            }),
        );
        let result = gemini_to_openai(&resp, "gemini-1.5-flash", &ContentPolicy::default());

        assert_eq!(result.object, "chat.completion");
        assert_eq!(result.model, "gemini-1.5-flash");
        assert!(result.id.starts_with("chatcmpl-"));
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0].index, 0);
        assert_eq!(result.choices[0].message.role, "assistant");
        assert_eq!(result.choices[0].message.content, "hello");
        assert_eq!(result.choices[0].finish_reason, "stop");
        assert_eq!(result.usage.prompt_tokens, 10);
        assert_eq!(result.usage.completion_tokens, 20);
        assert_eq!(result.usage.total_tokens, 30);
    }

    #[test]
    fn test_missing_path_defaults_to_empty() {
        let no_candidates = GenerateContentResponse::default();
        assert_eq!(extract_text(&no_candidates), "");

        let no_content = GenerateContentResponse {
            candidates: vec![Candidate { content: None }],
            usage_metadata: None,
        };
        assert_eq!(extract_text(&no_content), "");

        let no_text = make_response(None, None);
        assert_eq!(extract_text(&no_text), "");

        let result = gemini_to_openai(&no_candidates, "m", &ContentPolicy::default());
        assert_eq!(result.choices[0].message.content, "");
        assert_eq!(result.usage, ChatUsage::default());
    }

    #[test]
    fn test_fallback_policy() {
        let blank = make_response(Some("  \n\t"), None);

        let enabled = ContentPolicy::with_fallback("(no response)");
        let result = gemini_to_openai(&blank, "m", &enabled);
        assert_eq!(result.choices[0].message.content, "(no response)");

        let disabled = ContentPolicy::default();
        let empty = make_response(Some(""), None);
        let result = gemini_to_openai(&empty, "m", &disabled);
        assert_eq!(result.choices[0].message.content, "");

        assert_eq!(enabled.apply(" ok ".to_string()), " ok ");
    }

    #[test]
    fn test_ids_are_fresh() {
        let resp = make_response(Some("x"), None);
        let a = gemini_to_openai(&resp, "m", &ContentPolicy::default());
        let b = gemini_to_openai(&resp, "m", &ContentPolicy::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(map_error_status(Some("INVALID_ARGUMENT")), "invalid_request_error");
        assert_eq!(map_error_status(Some("PERMISSION_DENIED")), "authentication_error");
        assert_eq!(map_error_status(Some("RESOURCE_EXHAUSTED")), "rate_limit_error");
        assert_eq!(map_error_status(Some("INTERNAL")), "api_error");
        assert_eq!(map_error_status(None), "api_error");

        let err = GeminiErrorResponse::parse(
            r#"{"error":{"code":403,"message":"denied","status":"PERMISSION_DENIED"}}"#,
        )
        .unwrap();
        let translated = gemini_error_to_openai(&err, 403);
        assert_eq!(translated.error.message, "denied");
        assert_eq!(translated.error.error_type, "authentication_error");
        assert_eq!(translated.error.code, Some(403));
    }
}
