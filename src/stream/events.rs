// src/stream/events.rs
// Claude-compatible SSE event vocabulary (§4.G, §6 "SSE output contract").
//
// Grounded on the teacher's `advisory/providers/mod.rs` `AdvisoryEvent`
// enum (text/reasoning deltas, usage, done, error as a closed variant set)
// and `advisory/streaming.rs`'s SSE parsing, generalized from one text/done
// stream to the full Claude Messages event set this spec needs.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockPayload {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaPayload {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UsageDelta {
    pub output_tokens: i64,
}

/// The block kind as tracked by the SSE gate, independent of the payload
/// shape used when the block was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SseEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: MessageStartPayload },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: u32,
        content_block: ContentBlockPayload,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: DeltaPayload },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: u32 },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaPayload,
        usage: UsageDelta,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error {
        error: ErrorPayload,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
    #[serde(rename = "session_start")]
    SessionStart { session_id: String, start_time: String },
    #[serde(rename = "session_end")]
    SessionEnd {
        session_id: String,
        duration_ms: i64,
    },
    #[serde(rename = "completion")]
    Completion {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        finish_reason: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageStartPayload {
    pub id: String,
    pub role: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDeltaPayload {
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

impl SseEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            SseEvent::MessageStart { .. } => "message_start",
            SseEvent::ContentBlockStart { .. } => "content_block_start",
            SseEvent::ContentBlockDelta { .. } => "content_block_delta",
            SseEvent::ContentBlockStop { .. } => "content_block_stop",
            SseEvent::MessageDelta { .. } => "message_delta",
            SseEvent::MessageStop => "message_stop",
            SseEvent::Error { .. } => "error",
            SseEvent::SessionStart { .. } => "session_start",
            SseEvent::SessionEnd { .. } => "session_end",
            SseEvent::Completion { .. } => "completion",
        }
    }

    /// Render as a wire-format SSE frame: `event: <name>\ndata: <json>\n\n`.
    pub fn to_sse_string(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event_name(), data)
    }

    /// The block kind this event implies, if it touches a content block —
    /// used by the gate to infer a block's type for auto-start (§4.G.5).
    pub fn implied_block_kind(&self) -> Option<BlockKind> {
        match self {
            SseEvent::ContentBlockStart { content_block, .. } => Some(match content_block {
                ContentBlockPayload::Text { .. } => BlockKind::Text,
                ContentBlockPayload::ToolUse { .. } => BlockKind::ToolUse,
            }),
            SseEvent::ContentBlockDelta { delta, .. } => Some(match delta {
                DeltaPayload::TextDelta { .. } => BlockKind::Text,
                DeltaPayload::InputJsonDelta { .. } => BlockKind::ToolUse,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_sse_string_has_event_and_data_lines() {
        let event = SseEvent::MessageStop;
        let rendered = event.to_sse_string();
        assert!(rendered.starts_with("event: message_stop\n"));
        assert!(rendered.ends_with("\n\n"));
    }

    #[test]
    fn implied_block_kind_matches_delta_shape() {
        let delta = SseEvent::ContentBlockDelta {
            index: 1,
            delta: DeltaPayload::InputJsonDelta {
                partial_json: "{}".into(),
            },
        };
        assert_eq!(delta.implied_block_kind(), Some(BlockKind::ToolUse));
    }
}
