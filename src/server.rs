use crate::auth::resolve_upstream_key;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::proxy;
use crate::translate::anthropic_types::{MessagesRequest, StreamEvent};

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
}

impl AppState {
    /// Build the shared state, including an upstream client honouring the configured timeout.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.upstream.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/v1/messages",
            post(handle_messages).fallback(handle_method_not_allowed),
        )
        .route(
            "/v1/chat/completions",
            post(handle_chat_completions).fallback(handle_method_not_allowed),
        )
        .route(
            "/v1/models",
            get(handle_models).fallback(handle_method_not_allowed),
        )
        .route("/health", get(handle_health))
        .fallback(handle_not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let api_key = match resolve_upstream_key(&headers, &state.config) {
        Ok(k) => k,
        Err(e) => return e.into_response(),
    };

    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Failed to parse request");
            return ProxyError::invalid_request(format!("Invalid request body: {e}"))
                .into_response();
        }
    };

    if !state.config.is_model_allowed(&req.model) {
        warn!(model = %req.model, "Model not in whitelist");
        return ProxyError::invalid_request(format!("Model '{}' is not allowed", req.model))
            .into_response();
    }

    info!(
        model = %req.model,
        streaming = req.stream,
        messages = req.messages.len(),
        "Request"
    );

    if req.stream {
        handle_streaming(state, &req, &api_key).await
    } else {
        handle_non_streaming(state, &req, &api_key).await
    }
}

async fn handle_non_streaming(state: Arc<AppState>, req: &MessagesRequest, api_key: &str) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, &state.client, api_key).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            warn!(error = %e, "Proxy error");
            e.into_response()
        }
    }
}

async fn handle_streaming(state: Arc<AppState>, req: &MessagesRequest, api_key: &str) -> Response {
    let event_stream =
        match proxy::proxy_streaming(req, &state.config, &state.client, api_key).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Streaming setup error");
                return e.into_response();
            }
        };

    let sse_stream = event_stream.map(|event: StreamEvent| {
        Event::default().event(event.event_name()).json_data(&event)
    });

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let api_key = match resolve_upstream_key(&headers, &state.config) {
        Ok(k) => k,
        Err(e) => return e.into_response(),
    };

    if !state.config.models.is_empty() {
        let model = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("model").and_then(|m| m.as_str()).map(str::to_string));
        if let Some(model) = model.filter(|m| !state.config.is_model_allowed(m)) {
            return ProxyError::invalid_request(format!("Model '{model}' is not allowed"))
                .into_response();
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    match proxy::proxy_chat_completions(body, content_type, &state.config, &state.client, &api_key)
        .await
    {
        Ok(upstream) => passthrough_response(upstream),
        Err(e) => {
            warn!(error = %e, "Passthrough error");
            e.into_response()
        }
    }
}

/// Relay an upstream response unchanged: status, headers, and streamed body.
fn passthrough_response(upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder().status(status);
    for (name, value) in upstream.headers() {
        if is_hop_by_hop(name.as_str()) {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_bytes());
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name,
        "connection" | "transfer-encoding" | "content-length" | "keep-alive"
    )
}

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let api_key = match resolve_upstream_key(&headers, &state.config) {
        Ok(k) => k,
        Err(e) => return e.into_response(),
    };

    match proxy::fetch_models(&state.config, &state.client, &api_key).await {
        Ok(list) => Json(list).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to fetch models");
            e.into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_method_not_allowed() -> Response {
    let err = ProxyError::invalid_request("Method not allowed");
    (StatusCode::METHOD_NOT_ALLOWED, Json(err.to_error_response())).into_response()
}

async fn handle_not_found(uri: Uri) -> Response {
    ProxyError::not_found(format!("Not found: {}", uri.path())).into_response()
}
