use serde_json::{Deserializer, Map, Value};

use crate::error::AgentError;

/// First JSON object embedded in an LLM reply.
///
/// Replies arrive bare, inside a markdown fence, or after a sentence of
/// preamble. Every `{` is tried as the start of an object, so braces in
/// surrounding prose are skipped.
pub fn json_object(reply: &str) -> Result<Map<String, Value>, AgentError> {
    reply
        .match_indices('{')
        .find_map(|(offset, _)| object_at(&reply[offset..]))
        .ok_or_else(|| {
            AgentError::Parse(format!(
                "no JSON object in reply ({} bytes)",
                reply.len()
            ))
        })
}

/// The object `text` starts with, ignoring anything after it.
fn object_at(text: &str) -> Option<Map<String, Value>> {
    match Deserializer::from_str(text).into_iter::<Value>().next() {
        Some(Ok(Value::Object(map))) => Some(map),
        _ => None,
    }
}

/// Non-blank string field, trimmed.
pub fn string_field(object: &Map<String, Value>, field: &str) -> Option<String> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
