// src/stream/sse_gate.rs
// SSE output gate: enforces Claude's event-ordering contract (§4.G.5, §3
// "SSE block state" / "Message-level state machine").
//
// Non-strict mode self-heals (auto-close, synthesize missing starts) the
// way the spec describes; strict mode treats the same conditions as a hard
// error, for callers that want to catch upstream protocol drift loudly
// instead of papering over it.

use std::collections::{HashMap, HashSet};

use crate::error::{CoreError, CoreResult};
use crate::stream::events::{BlockKind, ContentBlockPayload, DeltaPayload, SseEvent};

struct BlockState {
    kind: BlockKind,
    started: bool,
    stopped: bool,
    tool_use_id: Option<String>,
}

pub struct SseGate {
    strict: bool,
    message_started: bool,
    message_delta_sent: bool,
    message_ended: bool,
    blocks: HashMap<u32, BlockState>,
    start_order: Vec<u32>,
    completed_tool_use_ids: HashSet<String>,
}

fn rejected<T>(strict: bool, context: &str) -> CoreResult<Vec<T>> {
    if strict {
        Err(CoreError::format_conversion(context.to_string()))
    } else {
        Ok(Vec::new())
    }
}

impl SseGate {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            message_started: false,
            message_delta_sent: false,
            message_ended: false,
            blocks: HashMap::new(),
            start_order: Vec::new(),
            completed_tool_use_ids: HashSet::new(),
        }
    }

    pub fn has_any_tool_use_block(&self) -> bool {
        self.blocks.values().any(|b| b.kind == BlockKind::ToolUse)
    }

    pub fn completed_tool_use_ids(&self) -> &HashSet<String> {
        &self.completed_tool_use_ids
    }

    fn open_text_block_index(&self) -> Option<u32> {
        self.start_order
            .iter()
            .copied()
            .find(|idx| {
                self.blocks
                    .get(idx)
                    .is_some_and(|b| b.kind == BlockKind::Text && b.started && !b.stopped)
            })
    }

    fn register_start(&mut self, index: u32, kind: BlockKind, tool_use_id: Option<String>) {
        self.blocks.insert(
            index,
            BlockState {
                kind,
                started: true,
                stopped: false,
                tool_use_id,
            },
        );
        self.start_order.push(index);
    }

    fn close_block(&mut self, index: u32) -> Option<SseEvent> {
        let block = self.blocks.get_mut(&index)?;
        if !block.started || block.stopped {
            return None;
        }
        block.stopped = true;
        if let Some(id) = &block.tool_use_id {
            self.completed_tool_use_ids.insert(id.clone());
        }
        Some(SseEvent::ContentBlockStop { index })
    }

    /// Process one raw event, returning the (possibly expanded, with
    /// auto-closes/synthesized starts inserted) sequence that should
    /// actually be written to the client.
    pub fn process(&mut self, event: SseEvent) -> CoreResult<Vec<SseEvent>> {
        match &event {
            SseEvent::MessageStart { .. } => {
                if self.message_started {
                    return rejected(self.strict, "duplicate message_start");
                }
                self.message_started = true;
                Ok(vec![event])
            }

            SseEvent::ContentBlockStart { index, content_block } => {
                if !self.message_started || self.message_ended {
                    return rejected(self.strict, "content_block_start outside message bounds");
                }
                if let Some(existing) = self.blocks.get(index) {
                    if existing.started && !existing.stopped {
                        return rejected(self.strict, "content_block_start on already-open index");
                    }
                }

                let mut out = Vec::new();
                let is_tool_use = matches!(content_block, ContentBlockPayload::ToolUse { .. });
                if is_tool_use {
                    if let Some(text_index) = self.open_text_block_index() {
                        if let Some(close) = self.close_block(text_index) {
                            out.push(close);
                        }
                    }
                }

                let tool_use_id = match content_block {
                    ContentBlockPayload::ToolUse { id, .. } => Some(id.clone()),
                    ContentBlockPayload::Text { .. } => None,
                };
                let kind = if is_tool_use { BlockKind::ToolUse } else { BlockKind::Text };
                self.register_start(*index, kind, tool_use_id);

                out.push(event);
                Ok(out)
            }

            SseEvent::ContentBlockDelta { index, delta } => {
                let mut out = Vec::new();

                match self.blocks.get(index) {
                    Some(block) if block.stopped => {
                        return rejected(self.strict, "content_block_delta on stopped block");
                    }
                    Some(_) => {}
                    None => {
                        let kind = match delta {
                            DeltaPayload::InputJsonDelta { .. } => BlockKind::ToolUse,
                            DeltaPayload::TextDelta { .. } => BlockKind::Text,
                        };
                        let content_block = match kind {
                            BlockKind::ToolUse => ContentBlockPayload::ToolUse {
                                id: format!("synthetic-tool-{index}"),
                                name: "unknown".to_string(),
                                input: serde_json::Value::Object(Default::default()),
                            },
                            BlockKind::Text => ContentBlockPayload::Text { text: String::new() },
                        };
                        let tool_use_id = match &content_block {
                            ContentBlockPayload::ToolUse { id, .. } => Some(id.clone()),
                            ContentBlockPayload::Text { .. } => None,
                        };
                        self.register_start(*index, kind, tool_use_id);
                        out.push(SseEvent::ContentBlockStart {
                            index: *index,
                            content_block,
                        });
                    }
                }

                out.push(event);
                Ok(out)
            }

            SseEvent::ContentBlockStop { index } => match self.close_block(*index) {
                Some(closed) => Ok(vec![closed]),
                None => rejected(self.strict, "content_block_stop on unopened/closed block"),
            },

            SseEvent::MessageDelta { .. } => {
                if !self.message_started || self.message_delta_sent {
                    return rejected(self.strict, "message_delta before start or sent twice");
                }

                let open_indices: Vec<u32> = self
                    .start_order
                    .iter()
                    .copied()
                    .filter(|idx| self.blocks.get(idx).is_some_and(|b| b.started && !b.stopped))
                    .collect();

                if self.strict && !open_indices.is_empty() {
                    return Err(CoreError::format_conversion(
                        "message_delta with still-open content blocks",
                    ));
                }

                let mut out: Vec<SseEvent> = open_indices
                    .into_iter()
                    .filter_map(|idx| self.close_block(idx))
                    .collect();

                self.message_delta_sent = true;
                out.push(event);
                Ok(out)
            }

            SseEvent::MessageStop => {
                if !self.message_started || self.message_ended {
                    return rejected(self.strict, "message_stop before start or sent twice");
                }
                self.message_ended = true;
                Ok(vec![event])
            }

            // Session/completion/error events aren't part of the block
            // state machine; they pass through unmodified (§4.G.5 "Unknown
            // event types pass through").
            _ => Ok(vec![event]),
        }
    }
}
