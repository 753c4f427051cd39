//! Conversation-log normalization.
//!
//! Turns an untrusted client payload (any JSON) into the strict ordered
//! message sequence the upstream Responses API accepts, or rejects the whole
//! request. Pure and deterministic: same input, same outcome.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

/// Upper bound on messages forwarded upstream. Older entries beyond the cap
/// are dropped so the payload models a sliding conversation window.
pub const MAX_MESSAGES: usize = 60;

/// Roles the upstream message schema recognizes. Anything else is dropped,
/// never repaired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(Role::System),
            "developer" => Some(Role::Developer),
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// Content part types the upstream schema accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PartType {
    InputText,
    OutputText,
    Refusal,
}

/// A single content part. `text` is non-empty and trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NormalizedPart {
    #[serde(rename = "type")]
    pub part_type: PartType,
    pub text: String,
}

/// One message of the normalized payload. `content` always has at least one
/// part; entries that lose every part are dropped before this type is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: Vec<NormalizedPart>,
}

/// Position of a part that failed the final wire scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct IllegalPart {
    pub message_index: usize,
    pub part_index: usize,
    pub role: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("`logs` must be an array of messages")]
    InvalidInput,
    #[error("no valid messages after normalization")]
    NoValidMessages,
    #[error(
        "found illegal content type \"text\" in payload; expected input_text/output_text/refusal"
    )]
    IllegalContentType { positions: Vec<IllegalPart> },
}

/// Normalize a raw request body into an upstream-ready payload.
///
/// Accepts either a top-level array of log entries or an object carrying the
/// array under `logs`. Per entry: the role is lowercased and matched against
/// the recognized set (unknown roles drop the entry), parts with no text left
/// after trimming are dropped, part types are rewritten from the entry role,
/// and entries left with zero parts are dropped. The survivors are capped to
/// the most recent [`MAX_MESSAGES`] and given a final scan for the legacy raw
/// part type `"text"`, which must never reach the upstream schema.
pub fn normalize_logs(body: &Value) -> Result<Vec<NormalizedMessage>, NormalizeError> {
    let entries = resolve_logs(body).ok_or(NormalizeError::InvalidInput)?;

    let mut messages: Vec<NormalizedMessage> = entries
        .iter()
        .filter_map(normalize_entry)
        .collect();

    if messages.is_empty() {
        return Err(NormalizeError::NoValidMessages);
    }

    if messages.len() > MAX_MESSAGES {
        messages.drain(..messages.len() - MAX_MESSAGES);
    }

    // Belt-and-suspenders: the enum mapping above cannot emit "text", but the
    // scan runs on the serialized wire form so a future rename or mapping bug
    // fails the request instead of reaching the model.
    let wire = serde_json::to_value(&messages).unwrap_or_default();
    scan_wire_payload(&wire)?;

    Ok(messages)
}

/// The output part type is fully determined by the entry role: assistant
/// turns emit output-shaped parts (`refusal` only when declared as such),
/// every other role emits `input_text` regardless of what was declared.
pub fn part_type_for(role: Role, declared: &str) -> PartType {
    match role {
        Role::Assistant if declared.eq_ignore_ascii_case("refusal") => PartType::Refusal,
        Role::Assistant => PartType::OutputText,
        Role::System | Role::Developer | Role::User | Role::Tool => PartType::InputText,
    }
}

fn resolve_logs(body: &Value) -> Option<&Vec<Value>> {
    match body {
        Value::Array(entries) => Some(entries),
        Value::Object(map) => map.get("logs").and_then(Value::as_array),
        _ => None,
    }
}

fn normalize_entry(entry: &Value) -> Option<NormalizedMessage> {
    let raw_role = entry.get("role").map(scalar_text).unwrap_or_default();
    let role = Role::parse(&raw_role.to_lowercase())?;

    let parts = entry.get("content").and_then(Value::as_array)?;
    let content: Vec<NormalizedPart> = parts
        .iter()
        .filter_map(|part| normalize_part(role, part))
        .collect();

    if content.is_empty() {
        return None;
    }
    Some(NormalizedMessage { role, content })
}

fn normalize_part(role: Role, part: &Value) -> Option<NormalizedPart> {
    let text = part.get("text").map(scalar_text).unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        // A part carrying no text conveys nothing; drop it rather than reject.
        return None;
    }

    let declared = part
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Some(NormalizedPart {
        part_type: part_type_for(role, declared),
        text: text.to_string(),
    })
}

/// Lenient scalar-to-text coercion for untrusted fields: strings pass
/// through, numbers and bools are displayed, everything else counts as
/// absent.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Reject any part whose wire `type` is the raw legacy value `"text"`.
fn scan_wire_payload(payload: &Value) -> Result<(), NormalizeError> {
    let Some(messages) = payload.as_array() else {
        return Ok(());
    };

    let mut positions = Vec::new();
    for (message_index, message) in messages.iter().enumerate() {
        let Some(parts) = message.get("content").and_then(Value::as_array) else {
            continue;
        };
        for (part_index, part) in parts.iter().enumerate() {
            if part.get("type").and_then(Value::as_str) == Some("text") {
                positions.push(IllegalPart {
                    message_index,
                    part_index,
                    role: message
                        .get("role")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
        }
    }

    if positions.is_empty() {
        Ok(())
    } else {
        Err(NormalizeError::IllegalContentType { positions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(role: &str, parts: Vec<Value>) -> Value {
        json!({ "role": role, "content": parts })
    }

    fn text_part(part_type: &str, text: &str) -> Value {
        json!({ "type": part_type, "text": text })
    }

    #[test]
    fn rejects_bodies_without_a_logs_array() {
        for body in [
            json!("just a string"),
            json!(42),
            json!(null),
            json!({ "messages": [] }),
            json!({ "logs": "not an array" }),
            json!({ "logs": { "role": "user" } }),
        ] {
            assert_eq!(normalize_logs(&body), Err(NormalizeError::InvalidInput));
        }
    }

    #[test]
    fn accepts_top_level_array_and_logs_wrapper_equally() {
        let entries = json!([entry("user", vec![text_part("input_text", "hi")])]);
        let wrapped = json!({ "logs": entries });

        let from_array = normalize_logs(&entries).expect("array body");
        let from_wrapper = normalize_logs(&wrapped).expect("wrapped body");
        assert_eq!(from_array, from_wrapper);
    }

    #[test]
    fn assistant_text_part_becomes_output_text() {
        let body = json!([entry("assistant", vec![text_part("text", "hi")])]);
        let normalized = normalize_logs(&body).expect("valid entry");

        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].role, Role::Assistant);
        assert_eq!(
            normalized[0].content,
            vec![NormalizedPart {
                part_type: PartType::OutputText,
                text: "hi".to_string(),
            }]
        );
    }

    #[test]
    fn assistant_refusal_is_case_insensitive() {
        let body = json!([entry(
            "assistant",
            vec![text_part("REFUSAL", "cannot help with that")]
        )]);
        let normalized = normalize_logs(&body).expect("valid entry");
        assert_eq!(normalized[0].content[0].part_type, PartType::Refusal);
    }

    #[test]
    fn non_assistant_roles_always_map_to_input_text() {
        for role in ["system", "developer", "user", "tool"] {
            let body = json!([entry(role, vec![text_part("output_text", "payload")])]);
            let normalized = normalize_logs(&body).expect("valid entry");
            assert_eq!(normalized[0].content[0].part_type, PartType::InputText);
        }
    }

    #[test]
    fn role_matching_is_case_insensitive() {
        let body = json!([entry("ASSISTANT", vec![text_part("text", "hi")])]);
        let normalized = normalize_logs(&body).expect("valid entry");
        assert_eq!(normalized[0].role, Role::Assistant);
    }

    #[test]
    fn whitespace_only_part_is_dropped_and_may_take_the_entry_with_it() {
        let body = json!([entry("user", vec![text_part("anything", "  ")])]);
        assert_eq!(normalize_logs(&body), Err(NormalizeError::NoValidMessages));

        let body = json!([entry(
            "user",
            vec![text_part("anything", "  "), text_part("anything", "kept")]
        )]);
        let normalized = normalize_logs(&body).expect("one part survives");
        assert_eq!(normalized[0].content.len(), 1);
        assert_eq!(normalized[0].content[0].text, "kept");
    }

    #[test]
    fn unrecognized_role_drops_the_entry() {
        let body = json!([
            entry("bogus", vec![text_part("input_text", "ignored")]),
            entry("user", vec![text_part("input_text", "kept")]),
        ]);
        let normalized = normalize_logs(&body).expect("second entry survives");
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].role, Role::User);
    }

    #[test]
    fn entry_without_content_array_is_dropped() {
        let body = json!([
            json!({ "role": "user" }),
            json!({ "role": "user", "content": "not an array" }),
            entry("user", vec![text_part("input_text", "kept")]),
        ]);
        let normalized = normalize_logs(&body).expect("last entry survives");
        assert_eq!(normalized.len(), 1);
    }

    #[test]
    fn all_entries_dropped_is_a_rejection() {
        let body = json!([
            entry("bogus", vec![text_part("input_text", "x")]),
            entry("user", vec![]),
        ]);
        assert_eq!(normalize_logs(&body), Err(NormalizeError::NoValidMessages));
    }

    #[test]
    fn numeric_and_bool_text_are_stringified() {
        let body = json!([entry(
            "user",
            vec![json!({ "type": "input_text", "text": 42 })]
        )]);
        let normalized = normalize_logs(&body).expect("number text kept");
        assert_eq!(normalized[0].content[0].text, "42");

        let body = json!([entry(
            "user",
            vec![json!({ "type": "input_text", "text": true })]
        )]);
        let normalized = normalize_logs(&body).expect("bool text kept");
        assert_eq!(normalized[0].content[0].text, "true");
    }

    #[test]
    fn structured_text_values_count_as_absent() {
        let body = json!([entry(
            "user",
            vec![json!({ "type": "input_text", "text": { "nested": "object" } })]
        )]);
        assert_eq!(normalize_logs(&body), Err(NormalizeError::NoValidMessages));
    }

    #[test]
    fn caps_to_the_most_recent_sixty_in_order() {
        let entries: Vec<Value> = (0..61)
            .map(|i| entry("user", vec![text_part("input_text", &format!("msg {i}"))]))
            .collect();
        let body = Value::Array(entries);

        let normalized = normalize_logs(&body).expect("valid entries");
        assert_eq!(normalized.len(), MAX_MESSAGES);
        assert_eq!(normalized[0].content[0].text, "msg 1");
        assert_eq!(normalized[59].content[0].text, "msg 60");
    }

    #[test]
    fn cap_counts_surviving_entries_not_raw_ones() {
        let mut entries: Vec<Value> = (0..30)
            .map(|_| entry("bogus", vec![text_part("x", "dropped")]))
            .collect();
        entries.extend(
            (0..40).map(|i| entry("user", vec![text_part("input_text", &format!("msg {i}"))])),
        );
        let normalized = normalize_logs(&Value::Array(entries)).expect("forty survive");
        assert_eq!(normalized.len(), 40);
    }

    #[test]
    fn normalization_is_idempotent_on_its_own_output() {
        let body = json!([
            entry("system", vec![text_part("text", "be terse")]),
            entry("user", vec![text_part("whatever", " question ")]),
            entry("assistant", vec![text_part("refusal", "no")]),
        ]);
        let first = normalize_logs(&body).expect("valid input");
        let as_value = serde_json::to_value(&first).expect("serializable");
        let second = normalize_logs(&as_value).expect("own output is valid input");
        assert_eq!(first, second);
    }

    #[test]
    fn wire_scan_rejects_literal_text_type() {
        let wire = json!([
            {
                "role": "user",
                "content": [
                    { "type": "input_text", "text": "fine" },
                    { "type": "text", "text": "leftover legacy shape" }
                ]
            }
        ]);
        let err = scan_wire_payload(&wire).expect_err("legacy part must fail the scan");
        match err {
            NormalizeError::IllegalContentType { positions } => {
                assert_eq!(positions.len(), 1);
                assert_eq!(positions[0].message_index, 0);
                assert_eq!(positions[0].part_index, 1);
                assert_eq!(positions[0].role, "user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wire_scan_passes_mapped_output() {
        let body = json!([
            entry("user", vec![text_part("text", "q")]),
            entry("assistant", vec![text_part("text", "a")]),
        ]);
        // The mapping rewrites every declared "text" before the scan runs.
        let normalized = normalize_logs(&body).expect("mapped payload is clean");
        assert_eq!(normalized[0].content[0].part_type, PartType::InputText);
        assert_eq!(normalized[1].content[0].part_type, PartType::OutputText);
    }

    #[test]
    fn part_type_dispatch_table() {
        assert_eq!(part_type_for(Role::Assistant, "refusal"), PartType::Refusal);
        assert_eq!(part_type_for(Role::Assistant, "Refusal"), PartType::Refusal);
        assert_eq!(part_type_for(Role::Assistant, "text"), PartType::OutputText);
        assert_eq!(part_type_for(Role::Assistant, ""), PartType::OutputText);
        assert_eq!(part_type_for(Role::User, "refusal"), PartType::InputText);
        assert_eq!(part_type_for(Role::System, "output_text"), PartType::InputText);
        assert_eq!(part_type_for(Role::Tool, "text"), PartType::InputText);
        assert_eq!(part_type_for(Role::Developer, ""), PartType::InputText);
    }
}
