//! Model strategy registry.
//!
//! A strategy decides how a request is shaped for a model family when a
//! structured-output [`Schema`] is supplied, and how that family's raw output
//! is turned back into text.
//!
//! Selection precedence (first match wins, model ids compared
//! case-insensitively):
//!
//! | # | Condition | Strategy | Kind |
//! |---|---|---|---|
//! | 1 | no schema | [`ModelStrategy::Default`] | `none` |
//! | 2 | id contains `claude` | [`ModelStrategy::Claude`] | `tool_mode` |
//! | 3 | id contains `gemini` | [`ModelStrategy::Gemini`] | `json_schema` |
//! | 4 | id contains `gpt-4-turbo` | [`ModelStrategy::SystemMessage`] | `system_message` |
//! | 5 | id contains `openai` or `gpt` | [`ModelStrategy::OpenAi`] | `json_schema` |
//! | 6 | id contains `llama-3` or `deepseek` | [`ModelStrategy::SystemMessage`] | `system_message` |
//! | 7 | anything else | [`ModelStrategy::SystemMessage`] | `system_message` |

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod system_message;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::model::{Message, Schema};

/// Model used when the caller names none and no schema is given.
pub const DEFAULT_MODEL: &str = "openrouter/auto";

/// Model used when the caller names none but supplies a schema.
pub const DEFAULT_SCHEMA_MODEL: &str = "openai/gpt-4o";

/// Diagnostic tag for the request-shaping approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    None,
    ToolMode,
    JsonSchema,
    SystemMessage,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StrategyKind::None => "none",
            StrategyKind::ToolMode => "tool_mode",
            StrategyKind::JsonSchema => "json_schema",
            StrategyKind::SystemMessage => "system_message",
        })
    }
}

/// Request-shaping and response-parsing behavior for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStrategy {
    /// Pass-through; used when no schema is requested.
    Default,
    /// Forced tool call carrying the schema as function parameters.
    Claude,
    /// `response_format.json_schema` with lenient parsing of fenced output.
    Gemini,
    /// Strict `response_format.json_schema`.
    OpenAi,
    /// Schema described in an injected system message.
    SystemMessage,
}

impl ModelStrategy {
    /// Pick the strategy for a model id, assuming a schema is present.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();

        if model.contains("claude") {
            ModelStrategy::Claude
        } else if model.contains("gemini") {
            ModelStrategy::Gemini
        } else if model.contains("gpt-4-turbo") {
            ModelStrategy::SystemMessage
        } else if model.contains("openai") || model.contains("gpt") {
            ModelStrategy::OpenAi
        } else {
            // llama-3 and deepseek land here too
            ModelStrategy::SystemMessage
        }
    }

    pub fn kind(self) -> StrategyKind {
        match self {
            ModelStrategy::Default => StrategyKind::None,
            ModelStrategy::Claude => StrategyKind::ToolMode,
            ModelStrategy::Gemini | ModelStrategy::OpenAi => StrategyKind::JsonSchema,
            ModelStrategy::SystemMessage => StrategyKind::SystemMessage,
        }
    }

    /// Tool-call output for this family is only delivered completely over a stream.
    pub fn should_force_stream(self) -> bool {
        matches!(self, ModelStrategy::Claude)
    }

    /// Request fields to merge into the base body.
    pub fn prepare_request(self, schema: Option<&Schema>, messages: &[Message]) -> RequestPatch {
        let Some(schema) = schema else {
            return RequestPatch::default();
        };

        match self {
            ModelStrategy::Default => RequestPatch::default(),
            ModelStrategy::Claude => claude::prepare_request(schema),
            ModelStrategy::Gemini => gemini::prepare_request(schema),
            ModelStrategy::OpenAi => openai::prepare_request(schema),
            ModelStrategy::SystemMessage => system_message::prepare_request(schema, messages),
        }
    }

    /// Turn raw model output into the caller-facing text.
    pub fn process_response(self, content: &str) -> String {
        match self {
            ModelStrategy::Default | ModelStrategy::OpenAi => content.to_string(),
            ModelStrategy::Claude | ModelStrategy::Gemini | ModelStrategy::SystemMessage => {
                extract_json_block(content)
            }
        }
    }
}

/// Fields a strategy contributes to the request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPatch {
    /// Replacement message list
    pub messages: Option<Vec<Message>>,
    pub response_format: Option<Value>,
    pub tools: Option<Value>,
    pub tool_choice: Option<Value>,
}

/// A resolved strategy bound to the concrete model id of a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStrategy {
    pub model: String,
    pub strategy: ModelStrategy,
    pub kind: StrategyKind,
}

impl SchemaStrategy {
    pub fn should_force_stream(&self) -> bool {
        self.strategy.should_force_stream()
    }

    pub fn prepare_request(&self, schema: Option<&Schema>, messages: &[Message]) -> RequestPatch {
        self.strategy.prepare_request(schema, messages)
    }

    pub fn process_response(&self, content: &str) -> String {
        self.strategy.process_response(content)
    }

    pub fn is_tool_mode(&self) -> bool {
        self.kind == StrategyKind::ToolMode
    }
}

/// Resolve the model id and strategy for a call. Never fails.
pub fn choose_schema_strategy(model: Option<&str>, schema: Option<&Schema>) -> SchemaStrategy {
    let model = model
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            if schema.is_some() {
                DEFAULT_SCHEMA_MODEL.to_string()
            } else {
                DEFAULT_MODEL.to_string()
            }
        });

    let strategy = match schema {
        None => ModelStrategy::Default,
        Some(_) => ModelStrategy::for_model(&model),
    };

    SchemaStrategy {
        kind: strategy.kind(),
        strategy,
        model,
    }
}

/// True for model ids of the Claude family.
pub fn is_claude_model(model: &str) -> bool {
    model.to_ascii_lowercase().contains("claude")
}

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").expect("valid regex"));
static FENCED_ANY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```\s*(.*?)\s*```").expect("valid regex"));
static BARE_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));

/// Pull a JSON payload out of model prose: a ```json fence, then any fence,
/// then the widest `{...}` span. Returns the input unchanged otherwise.
pub fn extract_json_block(content: &str) -> String {
    for pattern in [&*FENCED_JSON, &*FENCED_ANY] {
        if let Some(inner) = pattern.captures(content).and_then(|c| c.get(1)) {
            return inner.as_str().to_string();
        }
    }

    BARE_OBJECT
        .find(content)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Schema {
        serde_json::from_value(json!({
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        }))
        .unwrap()
    }

    #[test]
    fn test_no_schema_is_none_strategy() {
        let chosen = choose_schema_strategy(Some("anthropic/claude-3-sonnet"), None);
        assert_eq!(chosen.strategy, ModelStrategy::Default);
        assert_eq!(chosen.kind, StrategyKind::None);
        assert!(!chosen.should_force_stream());
    }

    #[test]
    fn test_default_models() {
        assert_eq!(choose_schema_strategy(None, None).model, DEFAULT_MODEL);

        let chosen = choose_schema_strategy(None, Some(&schema()));
        assert_eq!(chosen.model, DEFAULT_SCHEMA_MODEL);
        assert_eq!(chosen.strategy, ModelStrategy::OpenAi);
    }

    #[test]
    fn test_precedence_table() {
        let schema = schema();
        let cases = [
            ("anthropic/Claude-3.5-Sonnet", ModelStrategy::Claude, StrategyKind::ToolMode),
            ("google/gemini-2.0-flash", ModelStrategy::Gemini, StrategyKind::JsonSchema),
            ("openai/gpt-4-turbo", ModelStrategy::SystemMessage, StrategyKind::SystemMessage),
            ("openai/gpt-4o", ModelStrategy::OpenAi, StrategyKind::JsonSchema),
            ("openai/o3-mini", ModelStrategy::OpenAi, StrategyKind::JsonSchema),
            ("meta-llama/llama-3.3-70b", ModelStrategy::SystemMessage, StrategyKind::SystemMessage),
            ("deepseek/deepseek-chat", ModelStrategy::SystemMessage, StrategyKind::SystemMessage),
            ("mistralai/mistral-large", ModelStrategy::SystemMessage, StrategyKind::SystemMessage),
        ];

        for (model, strategy, kind) in cases {
            let chosen = choose_schema_strategy(Some(model), Some(&schema));
            assert_eq!(chosen.strategy, strategy, "{model}");
            assert_eq!(chosen.kind, kind, "{model}");
            assert_eq!(chosen.model, model);
        }
    }

    #[test]
    fn test_claude_forces_stream() {
        let chosen = choose_schema_strategy(Some("anthropic/claude-3-haiku"), Some(&schema()));
        assert!(chosen.should_force_stream());
        assert!(chosen.is_tool_mode());
    }

    #[test]
    fn test_blank_model_uses_default() {
        assert_eq!(choose_schema_strategy(Some("  "), None).model, DEFAULT_MODEL);
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(
            extract_json_block("Here:\n```json\n{\"a\": 1}\n```\nthanks"),
            "{\"a\": 1}"
        );
        assert_eq!(extract_json_block("```\n{\"b\": 2}\n```"), "{\"b\": 2}");
        assert_eq!(extract_json_block("sure {\"c\": {\"d\": 3}} done"), "{\"c\": {\"d\": 3}}");
        assert_eq!(extract_json_block("no json here"), "no json here");
    }

    #[test]
    fn test_process_response_per_strategy() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(ModelStrategy::OpenAi.process_response(raw), raw);
        assert_eq!(ModelStrategy::Default.process_response(raw), raw);
        assert_eq!(ModelStrategy::Gemini.process_response(raw), "{\"a\":1}");
        assert_eq!(ModelStrategy::SystemMessage.process_response(raw), "{\"a\":1}");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(StrategyKind::ToolMode.to_string(), "tool_mode");
        assert_eq!(StrategyKind::JsonSchema.to_string(), "json_schema");
    }
}
