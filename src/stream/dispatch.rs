// src/stream/dispatch.rs
// Event-type dispatch table (§4.G.4) — the registry of per-event-type
// handlers feeding the tool lifecycle manager, aggregator, and session
// manager.
//
// Decoded upstream frames use the permissive JSON path (§9 "fast vs safe
// JSON encoding"): payloads are read via `serde_json::Value` lookups rather
// than strict typed structs, since the upstream's own event shapes vary by
// event_type and partially-malformed fields should degrade gracefully
// rather than fail the whole frame.

use serde_json::Value;

use crate::frame::DecodedFrame;
use crate::stream::aggregator::StreamingJsonAggregator;
use crate::stream::events::{ContentBlockPayload, DeltaPayload, SseEvent};
use crate::stream::session::SessionManager;
use crate::stream::tool_lifecycle::{ToolCallRequest, ToolLifecycleManager};

const TEXT_BLOCK_INDEX: u32 = 0;

fn parse_payload(frame: &DecodedFrame) -> Value {
    serde_json::from_slice(&frame.payload).unwrap_or(Value::Null)
}

fn looks_like_tool_fragment(payload: &Value) -> bool {
    payload.get("toolUseId").is_some()
        && payload.get("name").is_some()
        && payload.get("content").is_none()
        && payload.get("messageStatus").is_none()
}

/// Owns the three §4.G collaborators and routes each decoded frame through
/// the table in §4.G.4, returning the raw (pre-gate) `SseEvent`s it
/// produced plus any completed text for aggregation-mode callers.
pub struct Dispatcher {
    pub tools: ToolLifecycleManager,
    pub aggregator: StreamingJsonAggregator,
    pub session: SessionManager,
    completion_text: String,
    final_stop_reason: Option<String>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            tools: ToolLifecycleManager::new(),
            aggregator: StreamingJsonAggregator::new(),
            session: SessionManager::new(),
            completion_text: String::new(),
            final_stop_reason: None,
        }
    }

    pub fn completion_text(&self) -> &str {
        &self.completion_text
    }

    /// The upstream-carried finish reason, if any frame mentioned one.
    pub fn upstream_stop_reason(&self) -> Option<&str> {
        self.final_stop_reason.as_deref()
    }

    pub fn dispatch(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        match frame.event_type() {
            "completion" => self.handle_completion(frame),
            "completion_chunk" => self.handle_completion_chunk(frame),
            "tool_call_request" => self.handle_tool_call_request(frame),
            "tool_call_error" => self.handle_tool_call_error(frame),
            "session_start" => vec![self.session.handle_session_start()],
            "session_end" => vec![self.session.handle_session_end()],
            "assistantResponseEvent" => self.handle_assistant_response_event(frame),
            "toolUseEvent" => self.handle_legacy_tool_use_event(frame),
            _ => Vec::new(),
        }
    }

    fn handle_completion(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        let payload = parse_payload(frame);
        let content = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let finish_reason = payload
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string);

        if let Some(reason) = &finish_reason {
            self.final_stop_reason = Some(reason.clone());
        }
        self.completion_text.push_str(&content);

        vec![SseEvent::Completion { content, finish_reason }]
    }

    fn handle_completion_chunk(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        let payload = parse_payload(frame);
        let content = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let finish_reason = payload.get("finish_reason").and_then(Value::as_str);

        self.completion_text.push_str(&content);

        let mut events = vec![SseEvent::ContentBlockDelta {
            index: TEXT_BLOCK_INDEX,
            delta: DeltaPayload::TextDelta { text: content },
        }];

        if let Some(reason) = finish_reason {
            self.final_stop_reason = Some(reason.to_string());
            events.push(SseEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            });
        }

        events
    }

    fn handle_tool_call_request(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        let payload = parse_payload(frame);
        let calls: Vec<ToolCallRequest> = payload
            .get("calls")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|c| {
                        let id = c.get("id")?.as_str()?.to_string();
                        let name = c.get("name")?.as_str()?.to_string();
                        let arguments = c.get("arguments").cloned().unwrap_or(Value::Null);
                        Some(ToolCallRequest { id, name, arguments })
                    })
                    .collect()
            })
            .unwrap_or_default();

        self.tools.handle_tool_call_request(&calls)
    }

    fn handle_tool_call_error(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        let payload = parse_payload(frame);
        let id = payload.get("id").and_then(Value::as_str).unwrap_or("");
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("tool call failed");
        self.tools.handle_tool_call_error(id, message)
    }

    fn handle_assistant_response_event(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        let payload = parse_payload(frame);

        if looks_like_tool_fragment(&payload) {
            return self.handle_legacy_tool_use_event(frame);
        }

        let content = payload
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let message_status = payload
            .get("messageStatus")
            .and_then(Value::as_str)
            .unwrap_or("IN_PROGRESS");

        self.completion_text.push_str(&content);

        match message_status {
            "IN_PROGRESS" => vec![SseEvent::ContentBlockDelta {
                index: TEXT_BLOCK_INDEX,
                delta: DeltaPayload::TextDelta { text: content },
            }],
            "Completed" | "Error" => {
                if message_status == "Error" {
                    self.final_stop_reason = Some("error".to_string());
                }
                vec![
                    SseEvent::ContentBlockStart {
                        index: TEXT_BLOCK_INDEX,
                        content_block: ContentBlockPayload::Text { text: String::new() },
                    },
                    SseEvent::ContentBlockDelta {
                        index: TEXT_BLOCK_INDEX,
                        delta: DeltaPayload::TextDelta { text: content },
                    },
                    SseEvent::ContentBlockStop {
                        index: TEXT_BLOCK_INDEX,
                    },
                ]
            }
            _ => Vec::new(),
        }
    }

    fn handle_legacy_tool_use_event(&mut self, frame: &DecodedFrame) -> Vec<SseEvent> {
        let payload = parse_payload(frame);
        let tool_use_id = payload
            .get("toolUseId")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let fragment = payload
            .get("input")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let stop = payload.get("stop").and_then(Value::as_bool).unwrap_or(false);

        let mut events = Vec::new();

        if self.tools.get(&tool_use_id).is_none() {
            events.extend(self.tools.handle_tool_call_request(&[ToolCallRequest {
                id: tool_use_id.clone(),
                name,
                arguments: Value::Null,
            }]));
        }

        let block_index = self
            .tools
            .get(&tool_use_id)
            .map(|r| r.block_index)
            .unwrap_or(TEXT_BLOCK_INDEX);

        events.extend(
            self.aggregator
                .push_fragment(&tool_use_id, &fragment, block_index),
        );

        if stop {
            let tools = &mut self.tools;
            self.aggregator.finalize(&tool_use_id, |id, args| {
                tools.update_tool_arguments(id, args);
            });
            events.extend(self.tools.handle_tool_call_result(&tool_use_id, Value::Null));
        }

        events
    }
}

/// §4.G.6 stop-reason decision, given the gate's view of whether any
/// tool_use block appeared.
pub fn decide_stop_reason(has_any_tool_use: bool, upstream_reason: Option<&str>) -> String {
    const KNOWN_REASONS: &[&str] = &[
        "end_turn",
        "max_tokens",
        "stop_sequence",
        "tool_use",
        "pause_turn",
        "refusal",
    ];

    if has_any_tool_use {
        return "tool_use".to_string();
    }
    if let Some(reason) = upstream_reason {
        if KNOWN_REASONS.contains(&reason) {
            return reason.to_string();
        }
    }
    "end_turn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DecodedFrame, HeaderValue};
    use std::collections::HashMap;

    fn frame(event_type: &str, payload: Value) -> DecodedFrame {
        let mut headers = HashMap::new();
        headers.insert(
            ":event-type".to_string(),
            HeaderValue::String(event_type.to_string()),
        );
        DecodedFrame {
            headers,
            payload: serde_json::to_vec(&payload).unwrap().into(),
        }
    }

    #[test]
    fn completion_chunk_appends_text_delta() {
        let mut dispatcher = Dispatcher::new();
        let events = dispatcher.dispatch(&frame(
            "completion_chunk",
            serde_json::json!({"content": "Hello"}),
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SseEvent::ContentBlockDelta { index: 0, .. }));
        assert_eq!(dispatcher.completion_text(), "Hello");
    }

    #[test]
    fn completion_chunk_with_finish_reason_also_stops_block() {
        let mut dispatcher = Dispatcher::new();
        let events = dispatcher.dispatch(&frame(
            "completion_chunk",
            serde_json::json!({"content": "Hi", "finish_reason": "end_turn"}),
        ));
        assert_eq!(events.len(), 2);
        assert_eq!(dispatcher.upstream_stop_reason(), Some("end_turn"));
    }

    #[test]
    fn assistant_response_event_completed_emits_full_block_triplet() {
        let mut dispatcher = Dispatcher::new();
        let events = dispatcher.dispatch(&frame(
            "assistantResponseEvent",
            serde_json::json!({"content": "Hello", "messageStatus": "Completed"}),
        ));
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], SseEvent::ContentBlockStart { .. }));
        assert!(matches!(events[2], SseEvent::ContentBlockStop { .. }));
    }

    #[test]
    fn assistant_response_event_tool_fragment_routes_to_tool_path() {
        let mut dispatcher = Dispatcher::new();
        let events = dispatcher.dispatch(&frame(
            "assistantResponseEvent",
            serde_json::json!({"toolUseId": "t1", "name": "lookup"}),
        ));
        assert!(!events.is_empty());
        assert!(dispatcher.tools.get("t1").is_some());
    }

    #[test]
    fn legacy_tool_use_event_finalizes_on_stop() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(&frame(
            "toolUseEvent",
            serde_json::json!({"toolUseId": "t1", "name": "lookup", "input": "{\"q\":", "stop": false}),
        ));
        dispatcher.dispatch(&frame(
            "toolUseEvent",
            serde_json::json!({"toolUseId": "t1", "name": "lookup", "input": "\"kiro\"}", "stop": false}),
        ));
        dispatcher.dispatch(&frame(
            "toolUseEvent",
            serde_json::json!({"toolUseId": "t1", "name": "lookup", "input": "", "stop": true}),
        ));
        let record = dispatcher.tools.get("t1").unwrap();
        assert_eq!(record.arguments, serde_json::json!({"q": "kiro"}));
    }

    #[test]
    fn unknown_event_type_is_dropped() {
        let mut dispatcher = Dispatcher::new();
        let events = dispatcher.dispatch(&frame("something_new", serde_json::json!({})));
        assert!(events.is_empty());
    }

    #[test]
    fn stop_reason_prefers_tool_use_over_upstream_reason() {
        assert_eq!(decide_stop_reason(true, Some("end_turn")), "tool_use");
        assert_eq!(decide_stop_reason(false, Some("max_tokens")), "max_tokens");
        assert_eq!(decide_stop_reason(false, None), "end_turn");
        assert_eq!(decide_stop_reason(false, Some("bogus")), "end_turn");
    }
}
