// src/stream/aggregator.rs
// Streaming JSON fragment aggregator (§4.G.2).
//
// Tools arrive in fragments across multiple `toolUseEvent` frames; this
// buffers per-tool-use-id fragment strings and finalizes them into a single
// JSON value once `stop=true` arrives. The finalize step takes its update
// target as a plain closure (§9 "pass the update callback as a function
// value, not a two-way owner relationship") so the aggregator never holds a
// reference back to the tool lifecycle manager.

use std::collections::HashMap;

use serde_json::Value;

use crate::stream::events::{DeltaPayload, SseEvent};

#[derive(Default)]
pub struct StreamingJsonAggregator {
    buffers: HashMap<String, String>,
}

impl StreamingJsonAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment for `tool_use_id` and, if it looks like a non-empty
    /// delta chunk, return the corresponding `input_json_delta` event for
    /// the block at `block_index`.
    pub fn push_fragment(
        &mut self,
        tool_use_id: &str,
        fragment: &str,
        block_index: u32,
    ) -> Vec<SseEvent> {
        self.buffers
            .entry(tool_use_id.to_string())
            .or_default()
            .push_str(fragment);

        if fragment.is_empty() {
            return Vec::new();
        }

        vec![SseEvent::ContentBlockDelta {
            index: block_index,
            delta: DeltaPayload::InputJsonDelta {
                partial_json: fragment.to_string(),
            },
        }]
    }

    /// Finalize the accumulated fragments for `tool_use_id` on `stop=true`:
    /// trim, parse as JSON (falling back to `{}` on invalid JSON), invoke
    /// `update` with the result, and clear the buffer.
    pub fn finalize(&mut self, tool_use_id: &str, mut update: impl FnMut(&str, Value)) -> Value {
        let raw = self.buffers.remove(tool_use_id).unwrap_or_default();
        let trimmed = raw.trim();
        let value: Value = if trimmed.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(trimmed).unwrap_or_else(|_| serde_json::json!({}))
        };
        update(tool_use_id, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_assembled_across_multiple_pieces_match_single_piece() {
        let mut piecewise = StreamingJsonAggregator::new();
        piecewise.push_fragment("t1", "{\"q\":", 1);
        piecewise.push_fragment("t1", "\"kiro\"}", 1);
        let mut captured = None;
        let result = piecewise.finalize("t1", |_, v| captured = Some(v));
        assert_eq!(result, serde_json::json!({"q": "kiro"}));
        assert_eq!(captured, Some(serde_json::json!({"q": "kiro"})));

        let mut single = StreamingJsonAggregator::new();
        single.push_fragment("t1", "{\"q\":\"kiro\"}", 1);
        let combined = single.finalize("t1", |_, _| {});
        assert_eq!(combined, result);
    }

    #[test]
    fn invalid_json_falls_back_to_empty_object() {
        let mut agg = StreamingJsonAggregator::new();
        agg.push_fragment("t1", "not json", 1);
        let result = agg.finalize("t1", |_, _| {});
        assert_eq!(result, serde_json::json!({}));
    }

    #[test]
    fn empty_fragment_produces_no_delta_event() {
        let mut agg = StreamingJsonAggregator::new();
        let events = agg.push_fragment("t1", "", 1);
        assert!(events.is_empty());
    }

    #[test]
    fn finalize_clears_buffer() {
        let mut agg = StreamingJsonAggregator::new();
        agg.push_fragment("t1", "{}", 1);
        agg.finalize("t1", |_, _| {});
        assert!(agg.buffers.get("t1").is_none());
    }
}
