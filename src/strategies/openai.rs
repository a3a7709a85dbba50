//! Strict JSON-schema shaping for OpenAI models.

use serde_json::{json, Value};

use super::RequestPatch;
use crate::model::Schema;

pub fn prepare_request(schema: &Schema) -> RequestPatch {
    RequestPatch {
        response_format: Some(json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name.as_deref().unwrap_or("result"),
                "strict": true,
                "schema": strict_schema(schema.object_schema()),
            }
        })),
        ..RequestPatch::default()
    }
}

/// Close every object schema for strict mode: `additionalProperties: false`
/// and a `required` list naming every property. Only the root keeps a
/// caller-supplied `required`; nested objects and array `items` always list
/// all of their properties.
pub fn strict_schema(schema: Value) -> Value {
    close_schema(schema, true)
}

fn close_schema(mut schema: Value, is_root: bool) -> Value {
    if let Value::Object(object) = &mut schema {
        let is_object = object.get("type").and_then(Value::as_str) == Some("object");

        let mut property_names = None;
        if let Some(Value::Object(properties)) = object.get_mut("properties") {
            for property in properties.values_mut() {
                *property = close_schema(property.take(), false);
            }
            property_names = Some(
                properties
                    .keys()
                    .cloned()
                    .map(Value::String)
                    .collect::<Vec<_>>(),
            );
        }

        if let Some(items) = object.get_mut("items") {
            *items = close_schema(items.take(), false);
        }

        if is_object {
            object
                .entry("additionalProperties")
                .or_insert(Value::Bool(false));
            if let Some(names) = property_names {
                if is_root {
                    object.entry("required").or_insert(Value::Array(names));
                } else {
                    object.insert("required".into(), Value::Array(names));
                }
            }
        }
    }

    schema
}
