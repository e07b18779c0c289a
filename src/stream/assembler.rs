// src/stream/assembler.rs
// Stream assembler: ties the dispatcher, SSE gate, and tool lifecycle
// manager together into either an SSE writer or an in-memory aggregation
// (§4.G, §4.G.6, §4.G.7).

use bytes::Bytes;

use crate::client_types::{AggregatedResponse, ResponseContentBlock, ResponseUsage};
use crate::error::CoreResult;
use crate::frame::DecodedFrame;
use crate::sink::ResponseSink;
use crate::stream::dispatch::{decide_stop_reason, Dispatcher};
use crate::stream::events::{
    MessageDeltaPayload, MessageStartPayload, SseEvent, UsageDelta,
};
use crate::stream::sse_gate::SseGate;
use crate::stream::tool_lifecycle::ToolStatus;

pub struct StreamAssembler {
    dispatcher: Dispatcher,
    gate: SseGate,
    message_id: String,
    model: String,
}

async fn write_events(sink: &mut dyn ResponseSink, events: Vec<SseEvent>) -> CoreResult<()> {
    for event in events {
        sink.write_chunk(Bytes::from(event.to_sse_string())).await?;
    }
    Ok(())
}

impl StreamAssembler {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>, strict: bool) -> Self {
        Self {
            dispatcher: Dispatcher::new(),
            gate: SseGate::new(strict),
            message_id: message_id.into(),
            model: model.into(),
        }
    }

    /// Write `message_start`; call once before the first decoded frame.
    pub async fn start(&mut self, sink: &mut dyn ResponseSink) -> CoreResult<()> {
        let events = self.gate.process(SseEvent::MessageStart {
            message: MessageStartPayload {
                id: self.message_id.clone(),
                role: "assistant".to_string(),
                model: self.model.clone(),
            },
        })?;
        write_events(sink, events).await
    }

    /// Feed one decoded frame through the dispatch table and the gate,
    /// writing whatever the gate emits to the client.
    pub async fn process_frame(
        &mut self,
        frame: &DecodedFrame,
        sink: &mut dyn ResponseSink,
    ) -> CoreResult<()> {
        let raw_events = self.dispatcher.dispatch(frame);
        for raw in raw_events {
            let gated = self.gate.process(raw)?;
            write_events(sink, gated).await?;
        }
        Ok(())
    }

    /// Feed one decoded frame without writing anything (aggregation mode);
    /// the dispatcher's internal state (completion text, tool records) is
    /// still updated, but tool-lifecycle/session SSE events are discarded
    /// since there is no client stream to write them to.
    pub fn process_frame_aggregating(&mut self, frame: &DecodedFrame) {
        self.dispatcher.dispatch(frame);
    }

    /// Completion text accumulated so far, for output-token estimation
    /// (§4.B) once the stream or aggregation pass has finished.
    pub fn completion_text(&self) -> &str {
        self.dispatcher.completion_text()
    }

    fn stop_reason(&self) -> String {
        decide_stop_reason(
            self.gate.has_any_tool_use_block() || self.dispatcher.tools.has_any_tool_use(),
            self.dispatcher.upstream_stop_reason(),
        )
    }

    /// Write the closing `message_delta` + `message_stop` pair (§4.G.6).
    pub async fn finish(
        &mut self,
        sink: &mut dyn ResponseSink,
        output_tokens: i64,
    ) -> CoreResult<()> {
        let stop_reason = self.stop_reason();

        let delta_events = self.gate.process(SseEvent::MessageDelta {
            delta: MessageDeltaPayload {
                stop_reason,
                stop_sequence: None,
            },
            usage: UsageDelta { output_tokens },
        })?;
        write_events(sink, delta_events).await?;

        let stop_events = self.gate.process(SseEvent::MessageStop)?;
        write_events(sink, stop_events).await
    }

    /// Build the non-streaming aggregated response (§4.G.7). Content is
    /// ordered text-first, then tool_use blocks in first-seen order
    /// (§8 invariant 3).
    pub fn aggregate(&self, input_tokens: i64, output_tokens: i64) -> AggregatedResponse {
        let mut content = Vec::new();

        let text = self.dispatcher.completion_text();
        if !text.is_empty() {
            content.push(ResponseContentBlock::Text {
                text: text.to_string(),
            });
        }

        for record in self.dispatcher.tools.records_in_first_seen_order() {
            if record.status == ToolStatus::Pending {
                continue;
            }
            content.push(ResponseContentBlock::ToolUse {
                id: record.id.clone(),
                name: record.name.clone(),
                input: record.arguments.clone(),
            });
        }

        AggregatedResponse {
            id: self.message_id.clone(),
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: self.model.clone(),
            stop_reason: self.stop_reason(),
            stop_sequence: None,
            usage: ResponseUsage {
                input_tokens,
                output_tokens,
            },
        }
    }
}
