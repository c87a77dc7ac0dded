//! Translate Anthropic Messages API requests into `OpenAI` Chat Completions requests.
//!
//! Each Anthropic message contributes at most one `OpenAI` message carrying the
//! message's text: the string content itself, or the first `text` block. Other
//! block kinds are dropped, and a message with no text is dropped entirely.

use super::anthropic_types::MessagesRequest;
use super::openai_types::{ChatCompletionRequest, ChatMessage, StreamOptions};

/// Translate an Anthropic Messages API request into an `OpenAI` Chat Completions request.
/// Pure function. `stream_usage` asks the upstream to report usage on streams.
pub fn anthropic_to_openai(req: &MessagesRequest, stream_usage: bool) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    if let Some(ref system) = req.system {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: system.as_text(),
        });
    }

    messages.extend(req.messages.iter().filter_map(|msg| {
        let text = msg.content.first_text().filter(|t| !t.is_empty())?;
        Some(ChatMessage {
            role: msg.role.as_str().to_string(),
            content: text.to_string(),
        })
    }));

    let stream_options = (req.stream && stream_usage).then_some(StreamOptions {
        include_usage: true,
    });

    ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        stream: req.stream,
        stream_options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::*;

    fn request(messages: Vec<Message>, system: Option<SystemContent>) -> MessagesRequest {
        MessagesRequest {
            model: "gpt-4o".to_string(),
            messages,
            system,
            max_tokens: Some(1024),
            temperature: Some(0.7),
            top_p: Some(0.9),
            stop_sequences: None,
            stream: false,
        }
    }

    fn text_message(role: Role, text: &str) -> Message {
        Message {
            role,
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn test_simple_text_request() {
        let req = request(
            vec![text_message(Role::User, "Hello")],
            Some(SystemContent::Text("You are helpful".to_string())),
        );

        let result = anthropic_to_openai(&req, true);

        assert_eq!(result.model, "gpt-4o");
        assert_eq!(result.max_tokens, Some(1024));
        assert_eq!(result.temperature, Some(0.7));
        assert_eq!(result.top_p, Some(0.9));
        assert!(!result.stream);
        assert!(result.stream_options.is_none());
        assert!(result.stop.is_none());
        assert_eq!(
            result.messages,
            vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are helpful".to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: "Hello".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_system_segments_joined_with_newline() {
        let req = request(
            vec![text_message(Role::User, "hi")],
            Some(SystemContent::Blocks(vec![
                SystemBlock {
                    block_type: "text".to_string(),
                    text: "a".to_string(),
                },
                SystemBlock {
                    block_type: "text".to_string(),
                    text: "b".to_string(),
                },
            ])),
        );

        let result = anthropic_to_openai(&req, true);
        assert_eq!(result.messages[0].role, "system");
        assert_eq!(result.messages[0].content, "a\nb");
    }

    #[test]
    fn test_first_text_block_only() {
        let req = request(
            vec![Message {
                role: Role::User,
                content: MessageContent::Blocks(vec![
                    ContentBlock::Image {
                        source: serde_json::json!({"type": "base64", "media_type": "image/png", "data": "AAAA"}),
                    },
                    ContentBlock::Text {
                        text: "first".to_string(),
                    },
                    ContentBlock::Text {
                        text: "second".to_string(),
                    },
                ]),
            }],
            None,
        );

        let result = anthropic_to_openai(&req, true);
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content, "first");
    }

    #[test]
    fn test_message_without_text_is_dropped() {
        let req = request(
            vec![
                text_message(Role::User, "What's the weather?"),
                Message {
                    role: Role::Assistant,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolUse {
                        id: "toolu_1".to_string(),
                        name: "get_weather".to_string(),
                        input: serde_json::json!({"city": "London"}),
                    }]),
                },
                Message {
                    role: Role::User,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id: "toolu_1".to_string(),
                        content: Some(serde_json::json!("rainy")),
                        is_error: None,
                    }]),
                },
                text_message(Role::User, ""),
                text_message(Role::Assistant, "It is rainy."),
            ],
            None,
        );

        let result = anthropic_to_openai(&req, true);
        let roles: Vec<&str> = result.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);
        assert!(result.messages.iter().all(|m| !m.content.is_empty()));
        assert_eq!(result.messages[1].content, "It is rainy.");
    }

    #[test]
    fn test_stream_and_stop_sequences() {
        let mut req = request(vec![text_message(Role::User, "count")], None);
        req.stream = true;
        req.stop_sequences = Some(vec!["END".to_string()]);

        let result = anthropic_to_openai(&req, true);
        assert!(result.stream);
        assert!(result.stream_options.as_ref().is_some_and(|o| o.include_usage));
        assert_eq!(result.stop, Some(vec!["END".to_string()]));

        let without_usage = anthropic_to_openai(&req, false);
        assert!(without_usage.stream_options.is_none());
    }

    #[test]
    fn test_other_roles_pass_through() {
        let req = request(
            vec![
                text_message(Role::Other("developer".to_string()), "be brief"),
                text_message(Role::User, "hi"),
            ],
            None,
        );

        let result = anthropic_to_openai(&req, true);
        let roles: Vec<&str> = result.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["developer", "user"]);
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let req = MessagesRequest {
            model: "m".to_string(),
            messages: vec![text_message(Role::User, "hi")],
            system: None,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
        };

        let value = serde_json::to_value(anthropic_to_openai(&req, true)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false
            })
        );
    }
}
