// src/translate.rs
// Claude-shaped request -> upstream conversation_state envelope (§4.F).
//
// Grounded on the teacher's `advisory/providers/opus.rs` request-building
// functions (plain free functions operating on owned request types, no
// builder struct) and `router/classifier.rs`'s ordered-rule style for the
// web-search filter predicate.

use std::collections::HashMap;

use serde_json::Value;

use crate::client_types::{ChatRequest, ContentBlock, MessageContent, Role, ToolDefinition};
use crate::config::ModelMapRule;
use crate::error::{CoreError, CoreResult};
use crate::identity::Identity;
use crate::model_map::map_model;
use crate::upstream_types::{
    AssistantResponseMessage, ChatTriggerType, ContextPayload, ConversationState, CurrentMessage,
    HistoryEntry, ImagePayload, ToolResultPayload, ToolSpecPayload, ToolUsePayload,
    UpstreamRequestBody, UserInputMessage,
};

const PLACEHOLDER_TOOL_TASK_TEXT: &str = "执行工具任务";
const MAX_TOOL_DESCRIPTION_LEN: usize = 10_000;

pub struct TranslationOutput {
    pub body: Vec<u8>,
    pub mapped_model_id: String,
}

fn is_web_search_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == "web_search" || lower == "websearch"
}

fn classify_image_media_type(media_type: &str) -> String {
    let lower = media_type.to_lowercase();
    if lower.contains("jpeg") || lower.contains("jpg") {
        "jpeg".to_string()
    } else if lower.contains("gif") {
        "gif".to_string()
    } else if lower.contains("webp") {
        "webp".to_string()
    } else {
        "png".to_string()
    }
}

/// The current message's content split into text/images/tool-results
/// (§4.F step 5).
struct SplitContent {
    text: String,
    images: Vec<ImagePayload>,
    tool_results: Vec<ToolResultPayload>,
}

fn split_content(blocks: &[ContentBlock]) -> SplitContent {
    let mut texts = Vec::new();
    let mut images = Vec::new();
    let mut tool_results = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => texts.push(text.clone()),
            ContentBlock::Image { source } => images.push(ImagePayload {
                format: classify_image_media_type(&source.media_type),
                bytes: source.data.clone(),
            }),
            ContentBlock::ToolUse { .. } => {}
            ContentBlock::ToolResult {
                tool_use_id,
                is_error,
                content,
            } => tool_results.push(ToolResultPayload {
                tool_use_id: tool_use_id.clone(),
                content: content.as_text(),
                is_error: *is_error,
            }),
        }
    }

    SplitContent {
        text: texts.join(""),
        images,
        tool_results,
    }
}

fn build_tool_specs(tools: &[ToolDefinition]) -> Vec<ToolSpecPayload> {
    tools
        .iter()
        .filter(|t| !is_web_search_tool(&t.name))
        .map(|t| {
            let description: String = if t.description.chars().count() > MAX_TOOL_DESCRIPTION_LEN {
                t.description.chars().take(MAX_TOOL_DESCRIPTION_LEN).collect()
            } else {
                t.description.clone()
            };
            ToolSpecPayload {
                name: t.name.clone(),
                description,
                input_schema: t.input_schema.clone(),
            }
        })
        .collect()
}

fn chat_trigger_type(request: &ChatRequest) -> ChatTriggerType {
    let tools_present = request.tools.as_ref().is_some_and(|t| !t.is_empty());
    let forces_tool_use = request
        .tool_choice
        .as_ref()
        .is_some_and(|tc| tc.forces_tool_use());
    if tools_present && forces_tool_use {
        ChatTriggerType::Auto
    } else {
        ChatTriggerType::Manual
    }
}

/// Reconstruct `tool_uses[]` for a past assistant message from its
/// `tool_use` content blocks (§4.F step 8), filtering web-search entries and
/// normalizing empty input to `{}`.
fn reconstruct_tool_uses(blocks: &[ContentBlock]) -> Vec<ToolUsePayload> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse { id, name, input } if !is_web_search_tool(name) => {
                let normalized = if matches!(input, Value::Null) {
                    Value::Object(Default::default())
                } else {
                    input.clone()
                };
                Some(ToolUsePayload {
                    tool_use_id: id.clone(),
                    name: name.clone(),
                    input: normalized,
                })
            }
            _ => None,
        })
        .collect()
}

struct BufferedUserTurn {
    texts: Vec<String>,
    images: Vec<ImagePayload>,
    tool_results: Vec<ToolResultPayload>,
}

impl BufferedUserTurn {
    fn new() -> Self {
        Self {
            texts: Vec::new(),
            images: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.texts.is_empty() && self.images.is_empty() && self.tool_results.is_empty()
    }

    fn absorb(&mut self, blocks: &[ContentBlock]) {
        for block in blocks {
            match block {
                ContentBlock::Text { text } => self.texts.push(text.clone()),
                ContentBlock::Image { source } => self.images.push(ImagePayload {
                    format: classify_image_media_type(&source.media_type),
                    bytes: source.data.clone(),
                }),
                ContentBlock::ToolResult {
                    tool_use_id,
                    is_error,
                    content,
                } => self.tool_results.push(ToolResultPayload {
                    tool_use_id: tool_use_id.clone(),
                    content: content.as_text(),
                    is_error: *is_error,
                }),
                ContentBlock::ToolUse { .. } => {}
            }
        }
    }

    fn flush(self, model_id: &str) -> UserInputMessage {
        let mut msg = UserInputMessage::new(self.texts.join("\n"), model_id);
        msg.images = self.images;
        if !self.tool_results.is_empty() {
            msg.content = String::new();
            msg.user_input_message_context = Some(ContextPayload {
                tool_results: self.tool_results,
                tools: Vec::new(),
            });
        }
        msg
    }
}

/// Build `history[]` for every message except the last (§4.F step 8). Only
/// emitted at all if a system prompt is present, there's more than one
/// message, or any tools are defined.
fn build_history(
    request: &ChatRequest,
    model_id: &str,
    has_tools: bool,
) -> Vec<HistoryEntry> {
    let past_messages = &request.messages[..request.messages.len().saturating_sub(1)];
    let should_emit = request.system.is_some() || request.messages.len() > 1 || has_tools;

    if !should_emit {
        return Vec::new();
    }

    let mut history = Vec::new();

    if let Some(system) = &request.system {
        let mut synthetic = UserInputMessage::new(system.as_text(), model_id);
        synthetic.images = Vec::new();
        history.push(HistoryEntry::User(synthetic));
        history.push(HistoryEntry::Assistant(AssistantResponseMessage {
            content: "OK".to_string(),
            tool_uses: Vec::new(),
        }));
    }

    let mut buffer = BufferedUserTurn::new();

    for message in past_messages {
        let blocks = message.content.as_blocks();
        match message.role {
            Role::User => buffer.absorb(&blocks),
            Role::Assistant => {
                let flushed = std::mem::replace(&mut buffer, BufferedUserTurn::new());
                history.push(HistoryEntry::User(flushed.flush(model_id)));

                let text: String = blocks
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                history.push(HistoryEntry::Assistant(AssistantResponseMessage {
                    content: text,
                    tool_uses: reconstruct_tool_uses(&blocks),
                }));
            }
        }
    }

    if !buffer.is_empty() {
        history.push(HistoryEntry::User(buffer.flush(model_id)));
        history.push(HistoryEntry::Assistant(AssistantResponseMessage {
            content: "OK".to_string(),
            tool_uses: Vec::new(),
        }));
    }

    history
}

/// Translate a Claude-shaped client request into the upstream envelope
/// (§4.F, the ten-step algorithm).
pub fn translate(
    request: &ChatRequest,
    identity: &Identity,
    exact_model_map: &HashMap<String, String>,
    model_rules: &[ModelMapRule],
) -> CoreResult<TranslationOutput> {
    if request.messages.is_empty() {
        return Err(CoreError::format_conversion("messages must not be empty"));
    }

    let mapped_model_id = map_model(&request.model, exact_model_map, model_rules)?;
    if mapped_model_id.is_empty() {
        return Err(CoreError::format_conversion("unsupported model"));
    }

    let chat_trigger_type = chat_trigger_type(request);

    let current = request.messages.last().expect("checked non-empty above");
    let current_blocks = current.content.as_blocks();
    let split = split_content(&current_blocks);

    let mut content = split.text;
    let mut context = ContextPayload::default();

    if !split.tool_results.is_empty() {
        context.tool_results = split.tool_results;
        content = String::new();
    }

    let has_tools = request.tools.as_ref().is_some_and(|t| !t.is_empty());
    if let Some(tools) = &request.tools {
        context.tools = build_tool_specs(tools);
    }

    if content.is_empty()
        && split.images.is_empty()
        && context.tool_results.is_empty()
        && has_tools
    {
        content = PLACEHOLDER_TOOL_TASK_TEXT.to_string();
    }

    if content.is_empty() && split.images.is_empty() && context.tool_results.is_empty() && !has_tools {
        return Err(CoreError::format_conversion(
            "current message has no text, images, or tool results",
        ));
    }

    if identity.conversation_id.is_empty() {
        return Err(CoreError::format_conversion("conversation_id must not be empty"));
    }

    let mut user_input_message = UserInputMessage::new(content, &mapped_model_id);
    user_input_message.images = split.images;
    if !context.is_empty() {
        user_input_message.user_input_message_context = Some(context);
    }

    let history = build_history(request, &mapped_model_id, has_tools);

    let state = ConversationState {
        conversation_id: identity.conversation_id.clone(),
        agent_continuation_id: identity.agent_continuation_id.clone(),
        agent_task_type: "vibe".to_string(),
        chat_trigger_type,
        current_message: CurrentMessage { user_input_message },
        history,
    };

    let envelope = UpstreamRequestBody {
        conversation_state: state,
    };

    // Strict/validating serializer (§9 "fast vs safe JSON encoding"): any
    // non-finite float or otherwise malformed value fails loudly here
    // instead of being forwarded to a strict upstream.
    let body = serde_json::to_vec(&envelope)
        .map_err(|e| CoreError::format_conversion(format!("upstream body encode failed: {e}")))?;

    Ok(TranslationOutput {
        body,
        mapped_model_id,
    })
}
