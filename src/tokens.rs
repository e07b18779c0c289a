// src/tokens.rs
// Heuristic token estimator (§4.B) — not a tokenizer, calibration constants
// are fixed tuning against a specific upstream and must not be "simplified"
// (§9).
//
// Pure functions, no I/O, grounded on the teacher's `TaskClassifier` style of
// small ordered-rule/threshold tables (`router/classifier.rs`) rather than
// any stateful struct.

use serde_json::Value;

use crate::client_types::{ChatRequest, ContentBlock, ToolDefinition};

const CJK_LOW: u32 = 0x4E00;
const CJK_HIGH: u32 = 0x9FFF;

fn is_cjk(c: char) -> bool {
    let cp = c as u32;
    (CJK_LOW..=CJK_HIGH).contains(&cp)
}

/// §4.B "Text" rule.
pub fn estimate_text(text: &str) -> i64 {
    if text.is_empty() {
        return 0;
    }

    let mut cjk_count: u32 = 0;
    let mut non_cjk_count: u32 = 0;
    for c in text.chars() {
        if is_cjk(c) {
            cjk_count += 1;
        } else {
            non_cjk_count += 1;
        }
    }

    let raw = if non_cjk_count == 0 {
        1 + cjk_count as f64
    } else {
        let r = if non_cjk_count < 50 {
            2.8
        } else if non_cjk_count < 100 {
            2.6
        } else {
            2.5
        };
        let non_cjk_tokens = (non_cjk_count as f64 / r).ceil();
        non_cjk_tokens + cjk_count as f64
    };

    let total_chars = cjk_count + non_cjk_count;
    let multiplier = if total_chars >= 1000 {
        0.60
    } else if total_chars >= 500 {
        0.70
    } else if total_chars >= 300 {
        0.80
    } else if total_chars >= 200 {
        0.85
    } else if total_chars >= 100 {
        0.90
    } else if total_chars >= 50 {
        0.95
    } else {
        1.0
    };

    let compressed = (raw * multiplier).round() as i64;
    compressed.max(1)
}

/// §4.B "Tool name" rule.
pub fn estimate_tool_name(name: &str) -> i64 {
    let len = name.chars().count() as f64;
    let underscores = name.chars().filter(|&c| c == '_').count() as i64;
    let uppercase = name.chars().filter(|c| c.is_uppercase()).count() as f64;

    let base = (len / 2.0).ceil() as i64;
    let total = base + underscores + (uppercase / 2.0).ceil() as i64;
    total.max(2)
}

/// §4.B "Content block" rule.
pub fn estimate_content_block(block: &ContentBlock) -> i64 {
    match block {
        ContentBlock::Text { text } => estimate_text(text),
        ContentBlock::Image { .. } => 1500,
        ContentBlock::ToolUse { name, input, .. } => {
            let overhead = 3 + 8 + 1 + estimate_tool_name(name) + 1;
            let serialized = serde_json::to_string(input).unwrap_or_default();
            let input_tokens = if serialized.is_empty() || serialized == "null" {
                1
            } else {
                ((serialized.chars().count() as f64) / 4.0).ceil() as i64
            };
            overhead + input_tokens
        }
        ContentBlock::ToolResult { content, .. } => estimate_text(&content.as_text()),
    }
}

/// Fallback for any content shape not covered by the typed rule above (the
/// spec's "unknown" bucket) — serialized-length heuristic.
pub fn estimate_unknown(value: &Value) -> i64 {
    let serialized = value.to_string();
    ((serialized.chars().count() as f64) / 4.0).ceil() as i64
}

struct ToolsArrayBudget {
    overhead: i64,
    per_tool_surcharge: i64,
    chars_per_token: f64,
    schema_url_bonus: i64,
    floor: i64,
}

fn tools_array_budget(tool_count: usize) -> ToolsArrayBudget {
    match tool_count {
        1 => ToolsArrayBudget {
            overhead: 0,
            per_tool_surcharge: 320,
            chars_per_token: 1.9,
            schema_url_bonus: 10,
            floor: 50,
        },
        2..=5 => ToolsArrayBudget {
            overhead: 100,
            per_tool_surcharge: 120,
            chars_per_token: 2.2,
            schema_url_bonus: 5,
            floor: 50,
        },
        _ => ToolsArrayBudget {
            overhead: 180,
            per_tool_surcharge: 60,
            chars_per_token: 2.5,
            schema_url_bonus: 5,
            floor: 30,
        },
    }
}

fn schema_mentions_schema_url(schema: &Value) -> bool {
    schema.get("$schema").is_some()
}

/// §4.B "Tools array" rule.
pub fn estimate_tools(tools: &[ToolDefinition]) -> i64 {
    if tools.is_empty() {
        return 0;
    }

    let budget = tools_array_budget(tools.len());
    let mut total = budget.overhead;

    for tool in tools {
        let mut per_tool = budget.per_tool_surcharge;
        per_tool += estimate_tool_name(&tool.name);
        per_tool += estimate_text(&tool.description);

        let schema_str = tool.input_schema.to_string();
        let schema_tokens =
            ((schema_str.chars().count() as f64) / budget.chars_per_token).ceil() as i64;
        per_tool += schema_tokens;

        if schema_mentions_schema_url(&tool.input_schema) {
            per_tool += budget.schema_url_bonus;
        }

        total += per_tool;
    }

    total.max(budget.floor)
}

/// §4.B "Message" rule: per-message role framing plus one-time system
/// overhead and base request overhead. Call once per request with the full
/// message count and whether a system prompt is present.
pub fn estimate_message_overhead(message_count: usize, has_system: bool) -> i64 {
    let mut total = 3 * message_count as i64;
    if has_system {
        total += 2;
    }
    total += 4;
    total
}

/// Admission-time input token estimate for a whole request: message framing
/// overhead, every content block across every message, and the tools array
/// if present. Used once at admission and once (via [`estimate_text`] over
/// the assembled completion) at response completion to fill `usage` (§4.B).
pub fn estimate_request_tokens(request: &ChatRequest) -> i64 {
    let mut total = estimate_message_overhead(request.messages.len(), request.system.is_some());

    if let Some(system) = &request.system {
        total += estimate_text(&system.as_text());
    }

    for message in &request.messages {
        for block in message.content.as_blocks() {
            total += estimate_content_block(&block);
        }
    }

    if let Some(tools) = &request.tools {
        total += estimate_tools(tools);
    }

    total
}
