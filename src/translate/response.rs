use super::anthropic_types::{MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::error::{ProxyError, Result};

/// Translate an OpenAI Chat Completion response into an Anthropic Messages response.
///
/// `id` and `model` are copied from the upstream. The first choice's content
/// becomes the single text block. A response without `choices[0]` or `usage`
/// is not a completion we can translate and yields `ProxyError::Translation`.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse) -> Result<MessagesResponse> {
    let choice = resp
        .choices
        .first()
        .ok_or_else(|| ProxyError::translation("upstream response has no choices"))?;
    let usage = resp
        .usage
        .as_ref()
        .ok_or_else(|| ProxyError::translation("upstream response has no usage"))?;

    let text = choice.message.content.clone().unwrap_or_default();

    Ok(MessagesResponse {
        id: resp.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content: vec![ResponseContentBlock::Text { text }],
        model: resp.model.clone(),
        stop_reason: Some(map_finish_reason(choice.finish_reason.as_deref()).to_string()),
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

/// Map OpenAI finish_reason to Anthropic stop_reason. Anything unrecognised,
/// including a missing reason, is a natural end of turn.
pub fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("stop") => "end_turn",
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        _ => "end_turn",
    }
}

/// Human-readable text of an upstream error body: the OpenAI error message when
/// the body is an error object, otherwise the (truncated) raw body.
pub fn upstream_error_text(body: &str) -> String {
    match serde_json::from_str::<ChatErrorResponse>(body) {
        Ok(err) => err.error.message,
        Err(_) => truncate(body.trim(), 500).to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
