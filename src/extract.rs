//! Non-streaming response extraction.

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{is_invalid_model_message, ClientError};
use crate::http::HttpResponse;
use crate::repair::repair_json;
use crate::strategies::{is_claude_model, SchemaStrategy};
use crate::stream::error_message;

/// Extract the call's text from one complete response.
///
/// An `error` field in the body becomes [`ClientError::InvalidModel`] when it
/// reads like a rejected model id and `allow_fallback` is set. Any other API
/// error is returned as a JSON envelope string rather than an `Err`.
pub async fn extract_response(
    response: HttpResponse,
    strategy: &SchemaStrategy,
    allow_fallback: bool,
) -> Result<String, ClientError> {
    let status = response.status;

    let payload: Value = if is_claude_model(&strategy.model) {
        // read as text first; some Claude deployments stall on direct JSON decoding
        let text = response.text().await?;
        serde_json::from_str(&text)?
    } else {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)?
    };

    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        let message = error_message(error);
        if allow_fallback && is_invalid_model_message(&message) {
            return Err(ClientError::InvalidModel {
                status: status.as_u16(),
                message,
            });
        }
        warn!(%status, %message, "provider returned an error body");
        return Ok(error_envelope(error, &message));
    }

    extract_payload(payload, strategy)
}

/// Extract from an already parsed body, normalizing Claude's message shape first.
pub fn extract_payload(mut payload: Value, strategy: &SchemaStrategy) -> Result<String, ClientError> {
    if is_claude_model(&strategy.model) {
        normalize_claude(&mut payload);
    }
    extract_content(&payload, strategy)
}

/// Content of `{choices:[{message}]}`, passed through the strategy.
pub fn extract_content(payload: &Value, strategy: &SchemaStrategy) -> Result<String, ClientError> {
    let message = payload.pointer("/choices/0/message");

    if let Some(arguments) = message
        .and_then(|m| m.pointer("/tool_calls/0/function/arguments"))
        .and_then(Value::as_str)
    {
        debug!(model = %strategy.model, "extracting tool call arguments");
        return Ok(repair_json(arguments));
    }

    let content = match message.and_then(|m| m.get("content")) {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => content_from_blocks(blocks),
        Some(object @ Value::Object(_)) => object.to_string(),
        _ => {
            return Err(ClientError::MalformedPayload(format!(
                "no content in response: {payload}"
            )))
        }
    };

    Ok(strategy.process_response(&content))
}

/// `tool_use` input if any block carries one, otherwise the text blocks joined.
fn content_from_blocks(blocks: &[Value]) -> String {
    if let Some(input) = blocks
        .iter()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .and_then(|block| block.get("input"))
    {
        return match input {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
    }

    blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect()
}

/// Rewrite a Claude messages-API body into the common choices envelope.
fn normalize_claude(payload: &mut Value) {
    if payload.get("choices").is_some() {
        return;
    }
    if let Some(content) = payload.get("content").cloned() {
        *payload = json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        });
    }
}

fn error_envelope(error: &Value, message: &str) -> String {
    json!({ "error": error, "message": message }).to_string()
}
