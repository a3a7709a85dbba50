//! Common data models for prompts, schemas and call results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Role of the message sender.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// What the caller asks the model: a bare prompt or an ordered conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    /// Conversation form of the prompt. A bare prompt becomes one user message.
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            Prompt::Text(text) => vec![Message::user(text)],
            Prompt::Messages(messages) => messages,
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

/// A JSON Schema fragment describing one property.
pub type PropertySpec = Value;

/// Structured-output contract passed alongside a call.
///
/// Keys other than the four named ones are preserved in `extra` and forwarded
/// to strategies that embed the schema verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub properties: Map<String, PropertySpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,

    #[serde(
        default,
        rename = "additionalProperties",
        skip_serializing_if = "Option::is_none"
    )]
    pub additional_properties: Option<bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Schema {
    pub fn new(properties: Map<String, PropertySpec>) -> Self {
        Self {
            properties,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_required(mut self, required: Vec<String>) -> Self {
        self.required = Some(required);
        self
    }

    pub fn with_additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = Some(allowed);
        self
    }

    /// Explicit `required` list, or every property name when absent.
    pub fn required_or_all(&self) -> Vec<String> {
        self.required
            .clone()
            .unwrap_or_else(|| self.properties.keys().cloned().collect())
    }

    /// The schema as a plain JSON object schema (`type: object`).
    pub fn object_schema(&self) -> Value {
        let mut object = Map::new();
        object.insert("type".into(), Value::String("object".into()));
        object.insert("properties".into(), Value::Object(self.properties.clone()));
        object.insert(
            "required".into(),
            Value::Array(self.required_or_all().into_iter().map(Value::String).collect()),
        );
        object.insert(
            "additionalProperties".into(),
            Value::Bool(self.additional_properties.unwrap_or(false)),
        );
        for (key, value) in &self.extra {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(object)
    }
}

/// Final text of a call.
///
/// Cheap to clone; clones share one allocation, which is the identity the
/// response metadata store is keyed on.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResponseText(Arc<str>);

impl ResponseText {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn shared(&self) -> &Arc<str> {
        &self.0
    }
}

impl Deref for ResponseText {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ResponseText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponseText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ResponseText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<String> for ResponseText {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Streaming call output.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Best current rendering of the in-progress answer.
    Partial(String),

    /// Terminal value; always the last item of a successful stream.
    Final(ResponseText),
}

impl StreamChunk {
    pub fn text(&self) -> &str {
        match self {
            StreamChunk::Partial(text) => text,
            StreamChunk::Final(text) => text.as_str(),
        }
    }
}
