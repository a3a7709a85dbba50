//! Schema-in-prompt shaping for models without a native structured-output mode.

use itertools::Itertools;
use serde_json::Value;

use super::RequestPatch;
use crate::model::{Message, Role, Schema};

/// Prepend a system message describing the schema, unless the caller already
/// supplied a system message.
pub fn prepare_request(schema: &Schema, messages: &[Message]) -> RequestPatch {
    if messages.iter().any(|m| m.role == Role::System) {
        return RequestPatch::default();
    }

    let mut patched = Vec::with_capacity(messages.len() + 1);
    patched.push(Message::system(describe_schema(schema)));
    patched.extend_from_slice(messages);

    RequestPatch {
        messages: Some(patched),
        ..RequestPatch::default()
    }
}

pub fn describe_schema(schema: &Schema) -> String {
    let fields = schema
        .properties
        .iter()
        .map(|(key, spec)| {
            let kind = spec.get("type").and_then(Value::as_str).unwrap_or("string");
            let description = spec
                .get("description")
                .and_then(Value::as_str)
                .map(|d| format!(" // {d}"))
                .unwrap_or_default();
            format!("  \"{key}\": {kind}{description}")
        })
        .join(",\n");

    format!(
        "Please return your response as JSON following this schema exactly:\n{{\n{fields}\n}}\n\
         Do not include any explanation or text outside of the JSON object."
    )
}
