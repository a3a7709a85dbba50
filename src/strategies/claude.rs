//! Tool-mode shaping for Claude models.
//!
//! The schema becomes the parameter list of a single function and the model
//! is forced to call it, so the answer arrives as tool-call arguments.

use serde_json::json;

use super::RequestPatch;
use crate::model::Schema;

pub const DEFAULT_TOOL_NAME: &str = "generate_structured_data";

pub fn prepare_request(schema: &Schema) -> RequestPatch {
    let name = schema.name.as_deref().unwrap_or(DEFAULT_TOOL_NAME);

    RequestPatch {
        tools: Some(json!([{
            "type": "function",
            "function": {
                "name": name,
                "description": "Generate structured data according to the schema",
                "parameters": schema.object_schema(),
            }
        }])),
        tool_choice: Some(json!({
            "type": "function",
            "function": { "name": name }
        })),
        ..RequestPatch::default()
    }
}
