//! State machine for translating an OpenAI SSE stream into Anthropic SSE events.
//!
//! The [`StreamTranslator`] is fed upstream text in arbitrarily sized pieces.
//! It reassembles lines, picks out `data:` frames, and emits the Anthropic
//! event sequence:
//!
//! ```text
//! message_start, content_block_start, content_block_delta*,
//! content_block_stop, message_delta, message_stop
//! ```
//!
//! The two start events are synthesized when the first frame parses; the three
//! closing events are emitted by [`StreamTranslator::finish`] once the upstream
//! stream has ended. Exactly one text content block (index 0) is produced.

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::openai_types::ChatCompletionChunk;
use super::response::map_finish_reason;

const TEXT_BLOCK_INDEX: usize = 0;
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// No upstream frame processed yet.
    Init,
    /// Start events emitted, deltas flowing.
    Streaming,
    /// Closing events emitted; further input is ignored.
    Finished,
}

/// Everything one stream needs to remember between chunks.
#[derive(Debug, Clone)]
pub struct StreamState {
    pub phase: StreamPhase,
    pub message_id: String,
    pub model: String,
    pub stop_reason: &'static str,
    pub output_tokens: u64,
}

impl StreamState {
    fn new(model: &str) -> Self {
        Self {
            phase: StreamPhase::Init,
            message_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            model: model.to_string(),
            stop_reason: "end_turn",
            output_tokens: 0,
        }
    }
}

/// Translates one OpenAI stream. Create one per request; never share.
///
/// Usage:
///   let mut translator = StreamTranslator::new("gpt-4o");
///   for text in upstream_chunks {
///       let events = translator.push_str(text);
///       // send each event as SSE
///   }
///   let final_events = translator.finish();
#[derive(Debug)]
pub struct StreamTranslator {
    state: StreamState,
    /// Trailing partial line carried over to the next chunk.
    pending: String,
}

impl StreamTranslator {
    /// `model` is reported in `message_start` if the upstream never names one.
    pub fn new(model: &str) -> Self {
        Self {
            state: StreamState::new(model),
            pending: String::new(),
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state.phase == StreamPhase::Finished
    }

    /// Feed a piece of upstream text. Complete lines are processed now; a
    /// trailing partial line waits for the next piece.
    pub fn push_str(&mut self, text: &str) -> Vec<StreamEvent> {
        if self.is_finished() {
            return Vec::new();
        }

        self.pending.push_str(text);

        let mut events = Vec::new();
        while let Some(newline_pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline_pos).collect();
            events.append(&mut self.process_line(&line));
        }
        events
    }

    /// Process one SSE line. Anything that is not a `data:` frame is ignored.
    pub fn process_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let line = line.trim_end_matches(['\r', '\n']);
        match line.strip_prefix("data:") {
            Some(data) => self.process_frame(data.trim()),
            None => Vec::new(),
        }
    }

    /// Process the payload of one `data:` frame.
    pub fn process_frame(&mut self, data: &str) -> Vec<StreamEvent> {
        if data.is_empty() || data == DONE_SENTINEL {
            return Vec::new();
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => self.process_chunk(&chunk),
            Err(e) => {
                tracing::warn!(error = %e, frame = %data, "Skipping unparseable stream frame");
                Vec::new()
            }
        }
    }

    /// Process a single parsed OpenAI streaming chunk.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        match self.state.phase {
            StreamPhase::Finished => return events,
            StreamPhase::Init => {
                if !chunk.model.is_empty() {
                    self.state.model = chunk.model.clone();
                }
                events.append(&mut self.start_events());
                self.state.phase = StreamPhase::Streaming;
            }
            StreamPhase::Streaming => {}
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ContentBlockDelta {
                    index: TEXT_BLOCK_INDEX,
                    delta: Delta::TextDelta {
                        text: text.to_string(),
                    },
                });
            }

            // Last writer wins
            if let Some(reason) = choice.finish_reason.as_deref() {
                self.state.stop_reason = map_finish_reason(Some(reason));
            }
        }

        if let Some(ref usage) = chunk.usage {
            self.state.output_tokens = usage.completion_tokens;
        }

        events
    }

    /// Call when the upstream stream ends to flush the closing events.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.is_finished() {
            return Vec::new();
        }

        let mut events = Vec::new();

        // A final frame without a trailing newline is still a frame.
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            events.append(&mut self.process_line(&line));
        }

        if self.state.phase == StreamPhase::Init {
            events.append(&mut self.start_events());
        }
        self.state.phase = StreamPhase::Finished;

        events.push(StreamEvent::ContentBlockStop {
            index: TEXT_BLOCK_INDEX,
        });
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(self.state.stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.state.output_tokens.max(1),
            },
        });
        events.push(StreamEvent::MessageStop);

        events
    }

    fn start_events(&self) -> Vec<StreamEvent> {
        vec![
            StreamEvent::MessageStart {
                message: MessagesResponse {
                    id: self.state.message_id.clone(),
                    response_type: "message".to_string(),
                    role: "assistant".to_string(),
                    content: Vec::new(),
                    model: self.state.model.clone(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: Usage::default(),
                },
            },
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(json: serde_json::Value) -> String {
        format!("data: {json}\n\n")
    }

    fn text_frame(content: &str) -> String {
        frame(serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "model": "upstream-model",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        }))
    }

    fn finish_frame(reason: &str) -> String {
        frame(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "upstream-model",
            "choices": [{"index": 0, "delta": {}, "finish_reason": reason}]
        }))
    }

    fn usage_frame(completion_tokens: u64) -> String {
        frame(serde_json::json!({
            "id": "chatcmpl-1",
            "model": "upstream-model",
            "choices": [],
            "usage": {"prompt_tokens": 7, "completion_tokens": completion_tokens, "total_tokens": 7 + completion_tokens}
        }))
    }

    fn names(events: &[StreamEvent]) -> Vec<&'static str> {
        events.iter().map(StreamEvent::event_name).collect()
    }

    fn run(chunks: &[&str]) -> Vec<StreamEvent> {
        let mut translator = StreamTranslator::new("requested-model");
        let mut events = Vec::new();
        for chunk in chunks {
            events.append(&mut translator.push_str(chunk));
        }
        events.append(&mut translator.finish());
        events
    }

    fn texts(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::ContentBlockDelta {
                    delta: Delta::TextDelta { text },
                    ..
                } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn closing_delta(events: &[StreamEvent]) -> (Option<String>, u64) {
        events
            .iter()
            .find_map(|e| match e {
                StreamEvent::MessageDelta { delta, usage } => {
                    Some((delta.stop_reason.clone(), usage.output_tokens))
                }
                _ => None,
            })
            .expect("message_delta present")
    }

    #[test]
    fn test_simple_text_stream() {
        let hello = text_frame("Hello");
        let world = text_frame(" world");
        let stop = finish_frame("stop");
        let usage = usage_frame(2);
        let events = run(&[&hello, &world, &stop, &usage, "data: [DONE]\n\n"]);

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(texts(&events), vec!["Hello", " world"]);
        assert_eq!(closing_delta(&events), (Some("end_turn".to_string()), 2));

        match &events[0] {
            StreamEvent::MessageStart { message } => {
                assert_eq!(message.model, "upstream-model");
                assert!(message.id.starts_with("msg_"));
                assert!(message.content.is_empty());
                assert_eq!(message.usage, Usage::default());
            }
            other => panic!("Expected message_start, got {other:?}"),
        }
    }

    #[test]
    fn test_start_events_emitted_once_before_first_delta() {
        let mut translator = StreamTranslator::new("requested-model");

        let first = translator.push_str(&text_frame("a"));
        assert_eq!(
            names(&first),
            vec!["message_start", "content_block_start", "content_block_delta"]
        );
        assert_eq!(translator.state().phase, StreamPhase::Streaming);

        let second = translator.push_str(&text_frame("b"));
        assert_eq!(names(&second), vec!["content_block_delta"]);
    }

    #[test]
    fn test_output_token_floor() {
        let stop = finish_frame("stop");
        let events = run(&[&stop]);
        assert_eq!(closing_delta(&events).1, 1);

        let zero = usage_frame(0);
        let events = run(&[&zero]);
        assert_eq!(closing_delta(&events).1, 1);
    }

    #[test]
    fn test_finish_reason_and_usage_last_writer_wins() {
        let length = finish_frame("length");
        let stop = finish_frame("stop");
        let first_usage = usage_frame(5);
        let second_usage = usage_frame(9);
        let events = run(&[&length, &first_usage, &stop, &second_usage]);
        assert_eq!(closing_delta(&events), (Some("end_turn".to_string()), 9));

        let tool = finish_frame("tool_calls");
        let events = run(&[&tool]);
        assert_eq!(closing_delta(&events).0.as_deref(), Some("tool_use"));
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let a = text_frame("a");
        let b = text_frame("b");
        let events = run(&[&a, "data: {not json\n\n", &b]);

        assert_eq!(texts(&events), vec!["a", "b"]);
        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn test_malformed_first_frame_does_not_start_stream() {
        let mut translator = StreamTranslator::new("requested-model");
        assert!(translator.push_str("data: garbage\n").is_empty());
        assert_eq!(translator.state().phase, StreamPhase::Init);
    }

    #[test]
    fn test_done_and_non_data_lines_emit_nothing() {
        let mut translator = StreamTranslator::new("requested-model");
        assert!(translator
            .push_str(": keep-alive\nevent: ping\nid: 3\n\ndata: [DONE]\n\n")
            .is_empty());
        assert_eq!(translator.state().phase, StreamPhase::Init);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let whole = text_frame("split me");
        let (head, tail) = whole.split_at(17);
        let events = run(&[head, tail]);

        assert_eq!(texts(&events), vec!["split me"]);
    }

    #[test]
    fn test_coalesced_frames_and_crlf() {
        let coalesced = format!(
            "{}{}",
            text_frame("one").replace('\n', "\r\n"),
            text_frame("two")
        );
        let events = run(&[&coalesced]);
        assert_eq!(texts(&events), vec!["one", "two"]);
    }

    #[test]
    fn test_trailing_frame_without_newline_is_flushed() {
        let events = run(&[r#"data: {"model":"m","choices":[{"delta":{"content":"tail"}}]}"#]);
        assert_eq!(texts(&events), vec!["tail"]);
        assert_eq!(names(&events).first(), Some(&"message_start"));
    }

    #[test]
    fn test_finish_without_chunks() {
        let events = run(&[]);

        assert_eq!(
            names(&events),
            vec![
                "message_start",
                "content_block_start",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        match &events[0] {
            StreamEvent::MessageStart { message } => assert_eq!(message.model, "requested-model"),
            other => panic!("Expected message_start, got {other:?}"),
        }
        assert_eq!(closing_delta(&events), (Some("end_turn".to_string()), 1));
    }

    #[test]
    fn test_input_after_finish_is_ignored() {
        let mut translator = StreamTranslator::new("requested-model");
        let _ = translator.push_str(&text_frame("x"));
        assert_eq!(translator.finish().len(), 3);

        assert!(translator.is_finished());
        assert!(translator.push_str(&text_frame("late")).is_empty());
        assert!(translator.finish().is_empty());
    }

    #[test]
    fn test_empty_content_emits_no_delta() {
        let role_only = frame(serde_json::json!({
            "model": "m",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]
        }));
        let events = run(&[&role_only]);
        assert!(texts(&events).is_empty());
    }

    #[test]
    fn test_null_fields_do_not_drop_frame() {
        let null_model = r#"data: {"id":null,"model":null,"created":null,"choices":[{"index":null,"delta":{"content":"hello"},"finish_reason":null}]}"#;
        let null_usage = r#"data: {"model":"m","choices":[{"delta":{"content":" world"},"finish_reason":"length"}],"usage":{"prompt_tokens":1,"completion_tokens":null,"total_tokens":null}}"#;
        let events = run(&[&format!("{null_model}\n"), &format!("{null_usage}\n")]);

        assert_eq!(texts(&events), vec!["hello", " world"]);
        match &events[0] {
            StreamEvent::MessageStart { message } => assert_eq!(message.model, "requested-model"),
            other => panic!("Expected message_start, got {other:?}"),
        }
        assert_eq!(closing_delta(&events), (Some("max_tokens".to_string()), 1));
    }

    #[test]
    fn test_streams_are_independent() {
        let a = StreamTranslator::new("m");
        let b = StreamTranslator::new("m");
        assert_ne!(a.state().message_id, b.state().message_id);
    }

    #[test]
    fn test_stop_sequence_always_null() {
        let events = run(&[&finish_frame("stop")]);
        for event in &events {
            let value = serde_json::to_value(event).unwrap();
            if let Some(message) = value.get("message") {
                assert!(message["stop_sequence"].is_null());
            }
            if event.event_name() == "message_delta" {
                assert!(value["delta"]["stop_sequence"].is_null());
            }
        }
    }
}
