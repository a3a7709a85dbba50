//! JSON-schema shaping for Gemini models.
//!
//! Gemini accepts `response_format.json_schema` but tends to wrap its answer
//! in a Markdown fence, so responses go through
//! [`extract_json_block`](super::extract_json_block).

use serde_json::json;

use super::RequestPatch;
use crate::model::Schema;

pub fn prepare_request(schema: &Schema) -> RequestPatch {
    RequestPatch {
        response_format: Some(json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name.as_deref().unwrap_or("result"),
                "schema": schema.object_schema(),
            }
        })),
        ..RequestPatch::default()
    }
}
