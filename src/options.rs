//! Per-call options and transport configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::model::Schema;

/// A secret string type for sensitive data like API keys.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Options for a single completion call.
///
/// Sampling parameters left as `None` are omitted from the wire payload; the
/// provider's own defaults apply.
///
/// # Example
/// ```rust
/// use callai::options::CallOptions;
///
/// let options = CallOptions::new()
///     .with_model("openai/gpt-4o")
///     .with_temperature(0.2)
///     .with_max_tokens(256);
/// assert!(!options.stream);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Model identifier (e.g. "anthropic/claude-3-sonnet", "openai/gpt-4o")
    pub model: Option<String>,

    /// API key; takes priority over refreshed and configured keys
    pub api_key: Option<SecretString>,

    /// Chat-completions endpoint override
    pub endpoint: Option<String>,

    /// Structured-output contract
    pub schema: Option<Schema>,

    /// Request a streamed response
    pub stream: bool,

    /// Temperature for sampling (0.0 - 2.0)
    pub temperature: Option<f64>,

    /// Top-p (nucleus) sampling parameter
    pub top_p: Option<f64>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,

    /// Stop sequences
    pub stop: Option<Vec<String>>,

    /// Raw `response_format`, sent as-is when no schema strategy sets one
    pub response_format: Option<Value>,

    /// Extra HTTP headers; override generated ones, case-insensitively
    pub headers: HashMap<String, String>,

    /// Disable the invalid-model fallback
    pub skip_retry: bool,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<SecretString>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top-p sampling parameter.
    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set maximum tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_response_format(mut self, response_format: Value) -> Self {
        self.response_format = Some(response_format);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_skip_retry(mut self, skip_retry: bool) -> Self {
        self.skip_retry = skip_retry;
        self
    }
}

/// Options for the default reqwest transport.
///
/// Request timeouts are the transport's concern; the call pipeline itself
/// never times out.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Request timeout
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,
}

impl TransportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}
