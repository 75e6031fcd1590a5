use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::proxy::{self, ProxyResult};
use crate::translate::openai_types::{ChatCompletionRequest, ChatErrorResponse};

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let logger = state
        .logger
        .for_request(uuid::Uuid::new_v4().simple().to_string());

    let Some(api_key) = extract_api_key(&headers).or_else(|| state.config.server_api_key()) else {
        logger.warn("server", "Rejected request without credentials");
        let err = ChatErrorResponse::authentication(
            "Missing API key. Send it as 'Authorization: Bearer <key>'.",
        );
        return (StatusCode::UNAUTHORIZED, Json(err)).into_response();
    };

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            logger.error("server", format!("Failed to parse request: {}", e));
            let err = ChatErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    logger.info(
        "server",
        format!(
            "Request: model={} streaming={} messages={}",
            req.model.as_deref().unwrap_or("(default)"),
            req.is_streaming(),
            req.messages.len()
        ),
    );

    let config = &state.config;
    let client = &state.client;

    if req.is_streaming() {
        match proxy::proxy_streaming(&req, &api_key, config, client, &logger).await {
            Ok(ProxyResult::Success(events)) => {
                let sse = events
                    .map(|event| Ok::<_, Infallible>(Event::default().data(event.to_sse_data())));
                Sse::new(sse).keep_alive(KeepAlive::default()).into_response()
            }
            Ok(ProxyResult::Error(err, status)) => backend_error_response(err, status),
            Err(e) => {
                logger.error("server", format!("Streaming setup error: {}", e));
                proxy_error_response(&e)
            }
        }
    } else {
        match proxy::proxy_non_streaming(&req, &api_key, config, client, &logger).await {
            Ok(ProxyResult::Success(resp)) => Json(resp).into_response(),
            Ok(ProxyResult::Error(err, status)) => backend_error_response(err, status),
            Err(e) => {
                logger.error("server", format!("Proxy error: {}", e));
                proxy_error_response(&e)
            }
        }
    }
}

/// Client credential from `Authorization: Bearer` or `x-goog-api-key`.
fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    let goog = || {
        headers
            .get("x-goog-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    bearer
        .or_else(goog)
        .filter(|key| !key.is_empty())
        .map(String::from)
}

fn backend_error_response(err: ChatErrorResponse, status: u16) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(err)).into_response()
}

fn proxy_error_response(e: &ProxyError) -> Response {
    let status = match e {
        ProxyError::Translation { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let err = ChatErrorResponse::api_error(format!("Proxy error: {}", e), status.as_u16());
    (status, Json(err)).into_response()
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let default_model = &state.config.backend.default_model;
    let mut aliases: Vec<&String> = state
        .config
        .models
        .keys()
        .filter(|name| *name != default_model)
        .collect();
    aliases.sort();

    let names = std::iter::once(default_model).chain(aliases);

    let models: Vec<serde_json::Value> = names
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": "google",
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_api_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_api_key(&headers), None);

        headers.insert("x-goog-api-key", HeaderValue::from_static("goog-key"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("goog-key"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-123"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("sk-123"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_api_key(&headers).as_deref(), Some("goog-key"));
    }

    #[test]
    fn test_empty_bearer_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_api_key(&headers), None);
    }

    #[test]
    fn test_proxy_error_status() {
        let resp = proxy_error_response(&ProxyError::backend("connection refused"));
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = proxy_error_response(&ProxyError::translation("bad json"));
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
