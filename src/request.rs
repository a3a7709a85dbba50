//! Request builder: turns messages, options and a strategy into a wire request.

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use crate::client::ClientError;
use crate::config::{Config, PROXY_MANAGED_KEY};
use crate::http::merge_headers;
use crate::model::Message;
use crate::options::{CallOptions, SecretString};
use crate::strategies::SchemaStrategy;

/// A fully shaped chat-completions request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
}

/// OpenAI-compatible request body. Unset sampling parameters are omitted.
#[derive(Debug, Serialize)]
struct ChatBody {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

/// Pick the key to send.
///
/// Priority: explicit option, then a previously refreshed key, then the
/// environment, then the proxy placeholder when a proxy manages credentials.
pub fn resolve_api_key(
    explicit: Option<&SecretString>,
    refreshed: Option<SecretString>,
    config: &Config,
) -> Result<SecretString, ClientError> {
    if let Some(key) = explicit {
        return Ok(key.clone());
    }
    if let Some(key) = refreshed {
        return Ok(key);
    }
    if let Some(key) = &config.api_key {
        return Ok(key.clone());
    }
    if config.proxy_managed {
        return Ok(SecretString::from(PROXY_MANAGED_KEY));
    }
    Err(ClientError::AuthRequired(
        "no API key provided and none configured".to_string(),
    ))
}

pub fn build_request(
    messages: Vec<Message>,
    strategy: &SchemaStrategy,
    options: &CallOptions,
    api_key: &SecretString,
    config: &Config,
    stream: bool,
) -> Result<ChatRequest, ClientError> {
    let mut body = ChatBody {
        model: strategy.model.clone(),
        messages,
        stream,
        temperature: options.temperature,
        top_p: options.top_p,
        max_tokens: options.max_tokens,
        stop: options.stop.clone(),
        response_format: None,
        tools: None,
        tool_choice: None,
    };

    if let Some(schema) = &options.schema {
        let patch = strategy.prepare_request(Some(schema), &body.messages);
        if let Some(messages) = patch.messages {
            body.messages = messages;
        }
        body.response_format = patch.response_format;
        body.tools = patch.tools;
        body.tool_choice = patch.tool_choice;
    }
    if body.response_format.is_none() {
        body.response_format = options.response_format.clone();
    }

    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.expose_secret()))
        .map_err(|_| ClientError::Config("API key contains invalid header characters".into()))?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let attribution = [
        ("HTTP-Referer", config.referer.as_ref()),
        ("X-Title", config.title.as_ref()),
    ];
    for (name, value) in attribution {
        if let Some(value) = value {
            let value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::Config(format!("invalid value for header {name}")))?;
            headers.insert(name, value);
        }
    }

    merge_headers(&mut headers, &options.headers)?;

    let url = options
        .endpoint
        .clone()
        .unwrap_or_else(|| config.chat_url().to_string());

    Ok(ChatRequest {
        url,
        headers,
        body: serde_json::to_value(&body)?,
    })
}
