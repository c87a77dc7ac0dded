//! Upstream calls made on behalf of the HTTP handlers.
//!
//! One upstream request per client request, no retries. Upstream failures come
//! back as `ProxyError::Upstream` carrying the upstream status and error text.

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{MessagesRequest, MessagesResponse, StreamEvent};
use crate::translate::openai_types::ChatCompletionResponse;
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::{openai_to_anthropic, upstream_error_text};
use crate::translate::streaming::StreamTranslator;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;
use std::pin::Pin;
use tracing::{debug, info, warn};

/// Translated Anthropic events for one streaming request.
pub type SseStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Forward a non-streaming Anthropic request and translate the completion back.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<MessagesResponse> {
    let url = config.upstream_url("/chat/completions");
    let openai_req = anthropic_to_openai(req, config.upstream.stream_usage);

    info!(url = %url, model = %openai_req.model, "POST upstream");

    let response = post_json(client, &url, api_key, &openai_req).await?;
    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::translation(format!("Failed to read upstream body: {e}")))?;

    debug!(body_len = body.len(), "Upstream response received");

    let openai_resp: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::translation(format!("Failed to parse upstream response: {e}"))
    })?;

    let anthropic_resp = openai_to_anthropic(&openai_resp)?;

    info!(
        input_tokens = anthropic_resp.usage.input_tokens,
        output_tokens = anthropic_resp.usage.output_tokens,
        "Completed"
    );

    Ok(anthropic_resp)
}

/// Forward a streaming Anthropic request, returning a stream of Anthropic events.
///
/// A non-success upstream status is reported as an error before any event is
/// produced, so the caller can still answer with a plain error response.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<SseStream> {
    let url = config.upstream_url("/chat/completions");
    let openai_req = anthropic_to_openai(req, config.upstream.stream_usage);

    info!(url = %url, model = %openai_req.model, "POST upstream (streaming)");

    let response = post_json(client, &url, api_key, &openai_req).await?;

    Ok(Box::pin(sse_translate_stream(
        response.bytes_stream(),
        req.model.clone(),
    )))
}

/// Fetch the upstream model list, keeping only whitelisted entries.
pub async fn fetch_models(
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<Value> {
    let url = config.upstream_url("/models");
    info!(url = %url, "GET upstream models");

    let response = client.get(&url).bearer_auth(api_key).send().await?;
    let response = ensure_success(response).await?;
    let list: Value = response
        .json()
        .await
        .map_err(|e| ProxyError::translation(format!("Failed to parse models response: {e}")))?;

    Ok(filter_models(list, config))
}

/// Forward a Chat Completions request verbatim. The upstream response is
/// returned as-is, whatever its status.
pub async fn proxy_chat_completions(
    body: Bytes,
    content_type: Option<&str>,
    config: &ProxyConfig,
    client: &reqwest::Client,
    api_key: &str,
) -> Result<reqwest::Response> {
    let url = config.upstream_url("/chat/completions");
    info!(url = %url, "Passthrough POST");

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .header("Content-Type", content_type.unwrap_or("application/json"))
        .body(body)
        .send()
        .await?;

    info!(status = response.status().as_u16(), "Passthrough response");
    Ok(response)
}

/// Drop `data` entries whose `id` is not whitelisted. Everything else passes through.
pub fn filter_models(mut list: Value, config: &ProxyConfig) -> Value {
    if config.models.is_empty() {
        return list;
    }
    if let Some(data) = list.get_mut("data").and_then(Value::as_array_mut) {
        data.retain(|model| {
            model
                .get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| config.is_model_allowed(id))
        });
    }
    list
}

async fn post_json<T: Serialize>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &T,
) -> Result<reqwest::Response> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await?;
    ensure_success(response).await
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = upstream_error_text(&body);
    warn!(status = status.as_u16(), error = %message, "Upstream error");
    Err(ProxyError::upstream(status.as_u16(), message))
}

/// Logs when a stream is dropped before the upstream finished, which means the
/// client went away and the upstream body is being dropped with it.
struct UpstreamGuard {
    upstream_done: bool,
}

impl Drop for UpstreamGuard {
    fn drop(&mut self) {
        if !self.upstream_done {
            info!("Client disconnected, aborting upstream stream");
        }
    }
}

/// Pipe upstream bytes through a fresh [`StreamTranslator`].
///
/// Bytes are only pulled when the consumer polls for the next event, so a slow
/// client slows the upstream read rather than buffering the reply.
pub fn sse_translate_stream<E: Display + Send + 'static>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    model: String,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);
        let mut carry: Vec<u8> = Vec::new();
        let mut guard = UpstreamGuard { upstream_done: false };

        futures::pin_mut!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "Upstream byte stream error");
                    break;
                }
            };

            let text = decode_utf8(&mut carry, &chunk);
            for event in translator.push_str(&text) {
                yield event;
            }
        }
        guard.upstream_done = true;

        if !carry.is_empty() {
            let rest = String::from_utf8_lossy(&carry).into_owned();
            for event in translator.push_str(&rest) {
                yield event;
            }
        }

        for event in translator.finish() {
            yield event;
        }

        info!(
            stop_reason = translator.state().stop_reason,
            output_tokens = translator.state().output_tokens,
            "Stream completed"
        );
    }
}

/// Decode as much of `carry + chunk` as possible, keeping an incomplete
/// trailing UTF-8 sequence in `carry` for the next chunk.
fn decode_utf8(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    carry.extend_from_slice(chunk);
    let valid = match std::str::from_utf8(carry) {
        Ok(_) => carry.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => carry.len(),
    };
    let text = String::from_utf8_lossy(&carry[..valid]).into_owned();
    carry.drain(..valid);
    text
}
