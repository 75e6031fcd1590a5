use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::RequestLogger;
use crate::translate::gemini_types::{GeminiErrorResponse, GenerateContentResponse};
use crate::translate::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatErrorResponse,
};
use crate::translate::request::openai_to_gemini;
use crate::translate::response::{gemini_error_to_openai, gemini_to_openai};
use crate::translate::streaming::{ReframedEvent, StreamReframer};

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::fmt::Display;
use std::pin::Pin;

/// Outcome of a backend exchange that reached the backend
pub enum ProxyResult<T> {
    Success(T),
    /// Backend answered with a non-2xx status before anything was sent to the client
    Error(ChatErrorResponse, u16),
}

/// Outgoing OpenAI event stream for one exchange
pub type SseStream = Pin<Box<dyn Stream<Item = ReframedEvent> + Send>>;

/// Forward a non-streaming chat request to Gemini and translate the reply.
pub async fn proxy_non_streaming(
    req: &ChatCompletionRequest,
    api_key: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<ProxyResult<ChatCompletionResponse>> {
    let model = config.resolve_model(req.model.as_deref());
    let url = config.endpoint_url(&model, false);

    logger.info("proxy", format!("POST {} model={}", url, model));

    let response = send(client, &url, api_key, req).await?;

    let status = response.status().as_u16();
    if status >= 400 {
        return Ok(backend_error(response, logger).await);
    }

    let body = response.text().await.map_err(|e| ProxyError::Http(e.without_url()))?;

    logger.debug(
        "proxy",
        format!("Response status={} body_len={}", status, body.len()),
    );

    let gemini_resp: GenerateContentResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!(
            "Failed to parse backend response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let chat_resp = gemini_to_openai(&gemini_resp, &model, &config.content_policy());

    logger.info(
        "proxy",
        format!(
            "Completed: prompt={} completion={} tokens",
            chat_resp.usage.prompt_tokens, chat_resp.usage.completion_tokens
        ),
    );

    Ok(ProxyResult::Success(chat_resp))
}

/// Forward a streaming chat request, returning the re-framed OpenAI event stream.
pub async fn proxy_streaming(
    req: &ChatCompletionRequest,
    api_key: &str,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &RequestLogger,
) -> Result<ProxyResult<SseStream>> {
    let model = config.resolve_model(req.model.as_deref());
    let url = config.endpoint_url(&model, true);

    logger.info("proxy", format!("POST {} model={} (streaming)", url, model));

    let response = send(client, &url, api_key, req).await?;

    if response.status().as_u16() >= 400 {
        return Ok(backend_error(response, logger).await);
    }

    let reframer = StreamReframer::new(&model, config.content_policy());
    let events = reframe_stream(response.bytes_stream(), reframer, logger.clone());

    Ok(ProxyResult::Success(Box::pin(events)))
}

async fn send(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    req: &ChatCompletionRequest,
) -> Result<reqwest::Response> {
    client
        .post(url)
        .query(&[("key", api_key)])
        .json(&openai_to_gemini(req))
        .send()
        .await
        .map_err(|e| ProxyError::backend(format!("Request failed: {}", e.without_url())))
}

async fn backend_error<T>(response: reqwest::Response, logger: &RequestLogger) -> ProxyResult<T> {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let err = match GeminiErrorResponse::parse(&body) {
        Some(err) => gemini_error_to_openai(&err, status),
        None => ChatErrorResponse::api_error(
            format!("Backend returned status {}: {}", status, truncate(&body, 500)),
            status,
        ),
    };

    logger.warn(
        "proxy",
        format!("Backend error status={}: {}", status, err.error.message),
    );

    ProxyResult::Error(err, status)
}

/// Pump backend bytes through the re-framer. A transport error ends the
/// stream immediately, without the terminal chunk or `[DONE]`.
fn reframe_stream<E>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    mut reframer: StreamReframer,
    logger: RequestLogger,
) -> impl Stream<Item = ReframedEvent> + Send + 'static
where
    E: Display + Send + 'static,
{
    async_stream::stream! {
        tokio::pin!(byte_stream);
        let mut failed = false;

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    logger.error("stream", format!("Byte stream error: {}", e));
                    failed = true;
                    break;
                }
            };

            for event in reframer.push(&chunk) {
                yield event;
            }
        }

        if !failed {
            for event in reframer.finish() {
                yield event;
            }
        }

        logger.info_with_context(
            "stream",
            if failed { "Stream aborted" } else { "Stream completed" },
            serde_json::json!({
                "frames": reframer.frames_seen(),
                "dropped_frames": reframer.dropped_frames(),
            }),
        );
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::SharedLogger;
    use crate::translate::response::ContentPolicy;
    use futures::stream;
    use tempfile::TempDir;

    fn logger(dir: &TempDir) -> RequestLogger {
        SharedLogger::new(dir.path().join("test.log"))
            .unwrap()
            .for_request("test")
    }

    fn frame(text: &str) -> Bytes {
        Bytes::from(format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":\"{text}\"}}]}}}}]}}\n\n"
        ))
    }

    #[test]
    fn test_clean_end_emits_terminal_markers() {
        let dir = TempDir::new().unwrap();
        let input = stream::iter(vec![Ok::<_, String>(frame("a")), Ok(frame("b"))]);
        let reframer = StreamReframer::new("m", ContentPolicy::default());

        let events: Vec<ReframedEvent> =
            tokio_test::block_on(reframe_stream(input, reframer, logger(&dir)).collect());

        let data: Vec<String> = events.iter().map(ReframedEvent::to_sse_data).collect();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].content(), Some("a"));
        assert_eq!(events[1].content(), Some("b"));
        assert_eq!(events[2].finish_reason(), Some("stop"));
        assert_eq!(data[3], "[DONE]");
    }

    #[test]
    fn test_transport_error_closes_without_terminal_markers() {
        let dir = TempDir::new().unwrap();
        let input = stream::iter(vec![
            Ok(frame("partial")),
            Err("connection reset".to_string()),
            Ok(frame("never")),
        ]);
        let reframer = StreamReframer::new("m", ContentPolicy::with_fallback("(none)"));

        let events: Vec<ReframedEvent> =
            tokio_test::block_on(reframe_stream(input, reframer, logger(&dir)).collect());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].content(), Some("partial"));
    }

    #[test]
    fn test_completion_is_logged_with_drop_count() {
        let dir = TempDir::new().unwrap();
        let shared = SharedLogger::new(dir.path().join("test.log")).unwrap();
        let input = stream::iter(vec![
            Ok::<_, String>(Bytes::from_static(b"data: {broken\n\n")),
            Ok(frame("ok")),
        ]);
        let reframer = StreamReframer::new("m", ContentPolicy::default());

        let _: Vec<ReframedEvent> = tokio_test::block_on(
            reframe_stream(input, reframer, shared.for_request("r1")).collect(),
        );

        let last = &shared.recent(1)[0];
        assert_eq!(last.message, "Stream completed");
        assert_eq!(last.request_id.as_deref(), Some("r1"));
        let ctx = last.context.as_ref().unwrap();
        assert_eq!(ctx["frames"], 2);
        assert_eq!(ctx["dropped_frames"], 1);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
