//! Demonstrate using the translation layer without a server.
//!
//! Usage:
//!   `cargo run --example translate_only`

use claude_openai_bridge::translate::anthropic_types::{
    Message, MessageContent, MessagesRequest, Role, SystemContent,
};
use claude_openai_bridge::translate::openai_types::{
    ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage,
};
use claude_openai_bridge::translate::request::anthropic_to_openai;
use claude_openai_bridge::translate::response::openai_to_anthropic;
use claude_openai_bridge::translate::streaming::StreamTranslator;

fn main() -> anyhow::Result<()> {
    // An Anthropic Messages API request, as a client would send it
    let anthropic_req = MessagesRequest {
        model: "gpt-4o".to_string(),
        messages: vec![
            Message {
                role: Role::User,
                content: MessageContent::Text("What is the capital of France?".to_string()),
            },
            Message {
                role: Role::Assistant,
                content: MessageContent::Text("The capital of France is Paris.".to_string()),
            },
            Message {
                role: Role::User,
                content: MessageContent::Text("And Germany?".to_string()),
            },
        ],
        system: Some(SystemContent::Text(
            "You are a geography expert. Be concise.".to_string(),
        )),
        max_tokens: Some(1024),
        temperature: None,
        top_p: None,
        stop_sequences: None,
        stream: true,
    };

    let openai_req = anthropic_to_openai(&anthropic_req, true);
    println!("=== OpenAI request ===");
    println!("{}", serde_json::to_string_pretty(&openai_req)?);

    // A completed upstream reply
    let openai_resp = ChatCompletionResponse {
        id: "chatcmpl-demo".to_string(),
        object: "chat.completion".to_string(),
        created: 0,
        model: "gpt-4o".to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some("The capital of Germany is Berlin.".to_string()),
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: 42,
            completion_tokens: 8,
            total_tokens: 50,
        }),
    };

    println!("\n=== Anthropic response ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&openai_to_anthropic(&openai_resp)?)?
    );

    // The same reply as an upstream stream, cut at awkward boundaries
    let upstream = concat!(
        "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"The capital \"}}]}\n\n",
        "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{\"content\":\"of Germany is Berlin.\"}}]}\n\n",
        "data: {\"model\":\"gpt-4o\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    println!("\n=== Anthropic SSE ===");
    let mut translator = StreamTranslator::new(&anthropic_req.model);
    let mut events = Vec::new();
    for piece in upstream.as_bytes().chunks(37) {
        events.append(&mut translator.push_str(&String::from_utf8_lossy(piece)));
    }
    events.append(&mut translator.finish());

    for event in &events {
        print!("{}", event.to_sse()?);
    }

    Ok(())
}
