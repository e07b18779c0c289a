// src/stream/tool_lifecycle.rs
// Tool execution lifecycle manager (§4.G.1, §3 "Tool execution record").
//
// Per the design notes (§9 "no back-pointers"), the manager does not hold a
// reference to the emitter or sink; every handler returns the `SseEvent`s it
// produces and the caller (the assembler) is responsible for routing them
// through the SSE gate.

use std::collections::HashMap;

use serde_json::Value;

use crate::stream::events::{ContentBlockPayload, DeltaPayload, ErrorPayload, SseEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct ToolExecutionRecord {
    pub id: String,
    pub name: String,
    pub status: ToolStatus,
    pub arguments: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub block_index: u32,
}

pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Owns block-index allocation (monotonic starting at 1; index 0 is
/// reserved for the text block, §3 "block_index is unique per id").
pub struct ToolLifecycleManager {
    records: HashMap<String, ToolExecutionRecord>,
    order: Vec<String>,
    next_index: u32,
}

impl Default for ToolLifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLifecycleManager {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            order: Vec::new(),
            next_index: 1,
        }
    }

    pub fn has_any_tool_use(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn records_in_first_seen_order(&self) -> Vec<&ToolExecutionRecord> {
        self.order.iter().filter_map(|id| self.records.get(id)).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ToolExecutionRecord> {
        self.records.get(id)
    }

    fn allocate_index(&mut self) -> u32 {
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }

    /// §4.G.1 `handle_tool_call_request`.
    pub fn handle_tool_call_request(&mut self, calls: &[ToolCallRequest]) -> Vec<SseEvent> {
        let mut events = Vec::new();

        for call in calls {
            if self.records.contains_key(&call.id) {
                continue;
            }

            let index = self.allocate_index();
            self.records.insert(
                call.id.clone(),
                ToolExecutionRecord {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    status: ToolStatus::Running,
                    arguments: call.arguments.clone(),
                    result: None,
                    error_message: None,
                    block_index: index,
                },
            );
            self.order.push(call.id.clone());

            events.push(SseEvent::ContentBlockStart {
                index,
                content_block: ContentBlockPayload::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: Value::Object(Default::default()),
                },
            });

            let has_args = call.arguments.as_object().is_some_and(|o| !o.is_empty())
                || call.arguments.as_array().is_some_and(|a| !a.is_empty());
            if has_args {
                let serialized = serde_json::to_string(&call.arguments).unwrap_or_default();
                events.push(SseEvent::ContentBlockDelta {
                    index,
                    delta: DeltaPayload::InputJsonDelta {
                        partial_json: serialized,
                    },
                });
            }
        }

        events
    }

    /// §4.G.1 `handle_tool_call_result`.
    pub fn handle_tool_call_result(&mut self, id: &str, result: Value) -> Vec<SseEvent> {
        let Some(record) = self.records.get_mut(id) else {
            return Vec::new();
        };
        if record.status != ToolStatus::Running {
            return Vec::new();
        }

        let index = record.block_index;
        record.result = Some(result);
        record.status = ToolStatus::Completed;

        vec![SseEvent::ContentBlockStop { index }]
    }

    /// §4.G.1 `handle_tool_call_error`.
    pub fn handle_tool_call_error(&mut self, id: &str, message: &str) -> Vec<SseEvent> {
        let Some(record) = self.records.get_mut(id) else {
            return Vec::new();
        };

        let index = record.block_index;
        record.status = ToolStatus::Error;
        record.error_message = Some(message.to_string());

        vec![
            SseEvent::Error {
                error: ErrorPayload {
                    error_type: "tool_error".to_string(),
                    message: message.to_string(),
                },
                tool_call_id: Some(id.to_string()),
            },
            SseEvent::ContentBlockStop { index },
        ]
    }

    /// §4.G.1 `update_tool_arguments` — no events, used when the aggregator
    /// finalizes fragmented JSON.
    pub fn update_tool_arguments(&mut self, id: &str, args: Value) {
        if let Some(record) = self.records.get_mut(id) {
            record.arguments = args;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_tool_call_gets_block_index_one() {
        let mut mgr = ToolLifecycleManager::new();
        let events = mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "lookup".into(),
            arguments: json!({"q": "kiro"}),
        }]);
        assert_eq!(events.len(), 2);
        match &events[0] {
            SseEvent::ContentBlockStart { index, .. } => assert_eq!(*index, 1),
            _ => panic!("expected content_block_start"),
        }
    }

    #[test]
    fn empty_arguments_suppress_delta_event() {
        let mut mgr = ToolLifecycleManager::new();
        let events = mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "lookup".into(),
            arguments: json!({}),
        }]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn duplicate_call_id_is_not_restarted() {
        let mut mgr = ToolLifecycleManager::new();
        mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "lookup".into(),
            arguments: json!({}),
        }]);
        let events = mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "lookup".into(),
            arguments: json!({}),
        }]);
        assert!(events.is_empty());
    }

    #[test]
    fn result_moves_status_to_completed_and_stops_block() {
        let mut mgr = ToolLifecycleManager::new();
        mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "lookup".into(),
            arguments: json!({}),
        }]);
        let events = mgr.handle_tool_call_result("t1", json!("42"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SseEvent::ContentBlockStop { index: 1 }));
        assert_eq!(mgr.get("t1").unwrap().status, ToolStatus::Completed);
    }

    #[test]
    fn error_emits_error_then_stop() {
        let mut mgr = ToolLifecycleManager::new();
        mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "lookup".into(),
            arguments: json!({}),
        }]);
        let events = mgr.handle_tool_call_error("t1", "boom");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], SseEvent::Error { .. }));
        assert!(matches!(events[1], SseEvent::ContentBlockStop { index: 1 }));
        assert_eq!(mgr.get("t1").unwrap().status, ToolStatus::Error);
    }

    #[test]
    fn second_tool_call_gets_next_index() {
        let mut mgr = ToolLifecycleManager::new();
        mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t1".into(),
            name: "a".into(),
            arguments: json!({}),
        }]);
        mgr.handle_tool_call_request(&[ToolCallRequest {
            id: "t2".into(),
            name: "b".into(),
            arguments: json!({}),
        }]);
        assert_eq!(mgr.get("t2").unwrap().block_index, 2);
    }
}
