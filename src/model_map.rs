// src/model_map.rs
// Ordered pattern-matched model name translation (§4.C).
//
// Grounded on the teacher's `router/classifier.rs`: const ordered-rule
// tables walked with `.iter().find()`/`.any()`, case-insensitive comparisons
// on a trimmed copy of the input, most-specific-first ordering.

use std::collections::HashMap;

use crate::config::ModelMapRule;
use crate::error::{CoreError, CoreResult};

/// Built-in exact matches for current model names, consulted after the
/// caller's exact map and ordered rules (§4.C precedence, §9 "Model map
/// precedence").
const BUILTIN_EXACT: &[(&str, &str)] = &[
    ("claude-opus-4-1", "CLAUDE_OPUS_4_1_20250805_V1_0"),
    ("claude-opus-4", "CLAUDE_OPUS_4_20250514_V1_0"),
    ("claude-sonnet-4-5", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("claude-sonnet-4", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("claude-3-7-sonnet", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("claude-3-5-haiku", "CLAUDE_3_5_HAIKU_20241022_V1_0"),
];

/// Wildcard fallbacks, most specific first (§4.C "built-in defaults place
/// exact matches ... first, then wildcard fallbacks").
const BUILTIN_WILDCARD: &[(&str, &str)] = &[
    ("*opus*", "CLAUDE_OPUS_4_1_20250805_V1_0"),
    ("*sonnet-4-5*", "CLAUDE_SONNET_4_5_20250929_V1_0"),
    ("*sonnet-4*", "CLAUDE_SONNET_4_20250514_V1_0"),
    ("*sonnet*", "CLAUDE_3_7_SONNET_20250219_V1_0"),
    ("*haiku*", "CLAUDE_3_5_HAIKU_20241022_V1_0"),
];

fn normalize(input: &str) -> String {
    input.trim().to_lowercase()
}

/// Matches `pattern` (already normalized to lowercase) against `candidate`
/// (already normalized). Supports exact, `*x*`, `x*`, `*x`, `x*y`.
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let leading_star = pattern.starts_with('*');
    let trailing_star = pattern.ends_with('*');

    match (leading_star, trailing_star) {
        (true, true) if pattern.len() >= 2 => {
            let inner = &pattern[1..pattern.len() - 1];
            !inner.is_empty() && candidate.contains(inner)
        }
        (false, true) => {
            let prefix = &pattern[..pattern.len() - 1];
            candidate.starts_with(prefix)
        }
        (true, false) => {
            let suffix = &pattern[1..];
            candidate.ends_with(suffix)
        }
        (false, false) => {
            if let Some(star_pos) = pattern.find('*') {
                let prefix = &pattern[..star_pos];
                let suffix = &pattern[star_pos + 1..];
                candidate.starts_with(prefix) && candidate.ends_with(suffix)
            } else {
                candidate == pattern
            }
        }
        _ => candidate == pattern,
    }
}

fn match_ordered_rules<'a>(rules: &'a [(&'a str, &'a str)], candidate: &str) -> Option<&'a str> {
    rules
        .iter()
        .find(|(pattern, _)| pattern_matches(&normalize(pattern), candidate))
        .map(|(_, target)| *target)
}

/// Resolve a client-supplied model name to an upstream model id.
///
/// Precedence: caller exact map (original key, then lowercased key) > caller
/// ordered rules > built-in exact > built-in wildcard. Empty result is a
/// hard error (§4.C "request rejected with unsupported model").
pub fn map_model(
    input: &str,
    exact_map: &HashMap<String, String>,
    rules: &[ModelMapRule],
) -> CoreResult<String> {
    let candidate = normalize(input);

    if let Some(target) = exact_map.get(input) {
        return Ok(target.clone());
    }
    if let Some(target) = exact_map.get(&candidate) {
        return Ok(target.clone());
    }

    for rule in rules {
        if pattern_matches(&normalize(&rule.pattern), &candidate) {
            return Ok(rule.target.clone());
        }
    }

    if let Some(target) = BUILTIN_EXACT
        .iter()
        .find(|(name, _)| normalize(name) == candidate)
        .map(|(_, target)| *target)
    {
        return Ok(target.to_string());
    }

    if let Some(target) = match_ordered_rules(BUILTIN_WILDCARD, &candidate) {
        return Ok(target.to_string());
    }

    Err(CoreError::format_conversion(format!(
        "unsupported model: {input}"
    )))
}
