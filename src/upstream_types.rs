// src/upstream_types.rs
// Upstream "conversation state" envelope (§3 "Upstream request", §4.F).
//
// Field names/casing follow what the `generateAssistantResponse` endpoint
// expects on the wire; these are serialize-only (the core never needs to
// deserialize a conversation_state back).

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChatTriggerType {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImagePayload {
    pub format: String,
    pub bytes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResultPayload {
    pub tool_use_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpecPayload {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ContextPayload {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResultPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpecPayload>,
}

impl ContextPayload {
    pub fn is_empty(&self) -> bool {
        self.tool_results.is_empty() && self.tools.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInputMessage {
    pub content: String,
    pub images: Vec<ImagePayload>,
    pub model_id: String,
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_input_message_context: Option<ContextPayload>,
}

impl UserInputMessage {
    pub fn new(content: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            images: Vec::new(),
            model_id: model_id.into(),
            origin: "AI_EDITOR".to_string(),
            user_input_message_context: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolUsePayload {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

/// One reconstructed assistant turn in `history[]` (§4.F step 8).
#[derive(Debug, Clone, Serialize)]
pub struct AssistantResponseMessage {
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_uses: Vec<ToolUsePayload>,
}

/// One entry of `history[]`: either the user or assistant side of a past
/// turn, kept as two separate variants so each serializes at the top level
/// the way the upstream expects (`{user_input_message: {...}}` /
/// `{assistant_response_message: {...}}`).
#[derive(Debug, Clone, Serialize)]
pub enum HistoryEntry {
    #[serde(rename = "userInputMessage")]
    User(UserInputMessage),
    #[serde(rename = "assistantResponseMessage")]
    Assistant(AssistantResponseMessage),
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentMessage {
    pub user_input_message: UserInputMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationState {
    pub conversation_id: String,
    pub agent_continuation_id: String,
    pub agent_task_type: String,
    pub chat_trigger_type: ChatTriggerType,
    pub current_message: CurrentMessage,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamRequestBody {
    pub conversation_state: ConversationState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_payload_reports_empty() {
        let ctx = ContextPayload::default();
        assert!(ctx.is_empty());
    }

    #[test]
    fn tool_result_is_error_flag_omitted_when_false() {
        let payload = ToolResultPayload {
            tool_use_id: "t1".into(),
            content: "ok".into(),
            is_error: false,
        };
        let v = serde_json::to_value(&payload).unwrap();
        assert!(v.get("is_error").is_none());
    }

    #[test]
    fn history_entry_serializes_with_wrapping_key() {
        let entry = HistoryEntry::User(UserInputMessage::new("hi", "model-1"));
        let v = serde_json::to_value(&entry).unwrap();
        assert!(v.get("userInputMessage").is_some());
    }

    #[test]
    fn conversation_state_serializes_chat_trigger_uppercase() {
        let state = ConversationState {
            conversation_id: "conv-1".into(),
            agent_continuation_id: "00000000-0000-5000-8000-000000000000".into(),
            agent_task_type: "vibe".into(),
            chat_trigger_type: ChatTriggerType::Auto,
            current_message: CurrentMessage {
                user_input_message: UserInputMessage::new("hi", "model-1"),
            },
            history: Vec::new(),
        };
        let v = serde_json::to_value(&state).unwrap();
        assert_eq!(v["chat_trigger_type"], "AUTO");
        assert!(v.get("history").is_none());
    }
}
