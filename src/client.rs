//! The call entry points, their error type, and the retry/fallback policy.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::extract::{extract_payload, extract_response};
use crate::http::{HttpResponse, HttpTransport, ReqwestTransport};
use crate::keys::KeyStore;
use crate::meta::{MetaStore, PendingMeta, ResponseMeta};
use crate::model::{Message, Prompt, ResponseText, StreamChunk};
use crate::options::{CallOptions, SecretString, TransportOptions};
use crate::request::{build_request, resolve_api_key};
use crate::strategies::{choose_schema_strategy, SchemaStrategy};
use crate::stream::{consume_stream, error_message, MetaRecorder};

/// Model substituted when the requested one is rejected as invalid.
pub const FALLBACK_MODEL: &str = "openrouter/auto";

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport failure, passed through untouched.
    #[error(transparent)]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status} {status_text}: {body}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    #[error("Invalid model (HTTP {status}): {message}")]
    InvalidModel { status: u16, message: String },

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Stream error: {message}")]
    StreamProtocol { message: String, payload: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Key refresh failed: {0}")]
    KeyRefresh(String),
}

impl ClientError {
    /// Build the error for a non-2xx response body.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").map(error_message))
            .unwrap_or_else(|| body.clone());

        if is_invalid_model_message(&message) || is_invalid_model_message(&body) {
            return ClientError::InvalidModel {
                status: status.as_u16(),
                message,
            };
        }

        ClientError::Http {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            body,
        }
    }

    pub fn is_invalid_model(&self) -> bool {
        matches!(self, ClientError::InvalidModel { .. })
    }

    /// Missing or rejected credentials.
    pub fn needs_new_key(&self) -> bool {
        match self {
            ClientError::AuthRequired(_) => true,
            ClientError::Http { status, .. } => matches!(status, 401 | 402 | 403),
            _ => false,
        }
    }

    /// HTTP status attached to the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } | ClientError::InvalidModel { status, .. } => {
                Some(*status)
            }
            ClientError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// True when a provider message says the requested model does not exist.
pub fn is_invalid_model_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    [
        "not a valid model",
        "invalid model",
        "model not found",
        "unknown model",
    ]
    .iter()
    .any(|phrase| message.contains(phrase))
}

/// Retry state of one call. Lives on the call's stack.
#[derive(Debug, Default)]
struct Attempt {
    model_override: Option<String>,
    refreshed_key: Option<SecretString>,
    fallback_used: bool,
    key_refreshed: bool,
}

impl Attempt {
    fn model<'a>(&'a self, options: &'a CallOptions) -> Option<&'a str> {
        self.model_override
            .as_deref()
            .or(options.model.as_deref())
    }
}

/// Streaming result of [`CallAi::call_stream`].
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, ClientError>>;

/// Entry point for completion calls.
///
/// # Example
/// ```no_run
/// use callai::client::CallAi;
/// use callai::config::Config;
/// use callai::options::CallOptions;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = CallAi::new(Config::load())?;
///     let options = CallOptions::new().with_model("openai/gpt-4o-mini");
///
///     let text = client.call("Say hello", &options).await?;
///     println!("{text}");
///     if let Some(meta) = client.response_meta(&text) {
///         println!("{} took {:?}", meta.model, meta.timing.duration);
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct CallAi {
    transport: Arc<dyn HttpTransport>,
    keys: Arc<KeyStore>,
    config: Config,
    meta: Arc<MetaStore>,
}

impl CallAi {
    /// Client using `reqwest` and, when configured, the HTTP key refresher.
    pub fn new(config: Config) -> Result<Self, ClientError> {
        Self::with_transport_options(config, &TransportOptions::default())
    }

    pub fn with_transport_options(
        config: Config,
        options: &TransportOptions,
    ) -> Result<Self, ClientError> {
        let transport = Arc::new(ReqwestTransport::new(options)?);
        let keys = Arc::new(KeyStore::from_config(&config));
        Ok(Self::from_parts(config, transport, keys))
    }

    pub fn from_parts(
        config: Config,
        transport: Arc<dyn HttpTransport>,
        keys: Arc<KeyStore>,
    ) -> Self {
        Self {
            transport,
            keys,
            config,
            meta: Arc::new(MetaStore::new()),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_key_store(mut self, keys: Arc<KeyStore>) -> Self {
        self.keys = keys;
        self
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Metadata recorded for a result returned by this client.
    pub fn response_meta(&self, text: &ResponseText) -> Option<ResponseMeta> {
        self.meta.get(text)
    }

    /// Run a call to completion and return its final text.
    ///
    /// Streams internally when `options.stream` is set or the model's
    /// strategy only delivers complete output over a stream.
    pub async fn call(
        &self,
        prompt: impl Into<Prompt>,
        options: &CallOptions,
    ) -> Result<ResponseText, ClientError> {
        let messages = prompt.into().into_messages();
        let strategy = choose_schema_strategy(options.model.as_deref(), options.schema.as_ref());

        if options.stream || strategy.should_force_stream() {
            if !options.stream {
                debug!(model = %strategy.model, "forcing streaming for this model");
            }
            return self.drain(self.stream_messages(messages, options).await?).await;
        }

        let mut attempt = Attempt::default();
        loop {
            match self.complete_once(&messages, options, &attempt).await {
                Ok(text) => return Ok(text),
                Err(error) => attempt = self.recover(error, options, attempt).await?,
            }
        }
    }

    /// Start a streaming call.
    ///
    /// Failures before the first byte (HTTP errors, rejected model or key) go
    /// through the retry policy. Errors inside the stream do not.
    pub async fn call_stream(
        &self,
        prompt: impl Into<Prompt>,
        options: &CallOptions,
    ) -> Result<ChunkStream, ClientError> {
        self.stream_messages(prompt.into().into_messages(), options)
            .await
    }

    async fn stream_messages(
        &self,
        messages: Vec<Message>,
        options: &CallOptions,
    ) -> Result<ChunkStream, ClientError> {
        let mut attempt = Attempt::default();
        loop {
            match self.open_stream(&messages, options, &attempt).await {
                Ok(chunks) => return Ok(chunks),
                Err(error) => attempt = self.recover(error, options, attempt).await?,
            }
        }
    }

    async fn drain(&self, mut chunks: ChunkStream) -> Result<ResponseText, ClientError> {
        let mut last = None;
        while let Some(chunk) = chunks.next().await {
            if let StreamChunk::Final(text) = chunk? {
                last = Some(text);
            }
        }
        last.ok_or_else(|| ClientError::MalformedPayload("stream ended without a result".into()))
    }

    async fn complete_once(
        &self,
        messages: &[Message],
        options: &CallOptions,
        attempt: &Attempt,
    ) -> Result<ResponseText, ClientError> {
        let (strategy, response, pending) = self.send(messages, options, attempt, false).await?;

        let allow_fallback = !options.skip_retry && !attempt.fallback_used;
        let text = ResponseText::from(extract_response(response, &strategy, allow_fallback).await?);
        self.meta.record(&text, pending.complete(&text));
        Ok(text)
    }

    async fn open_stream(
        &self,
        messages: &[Message],
        options: &CallOptions,
        attempt: &Attempt,
    ) -> Result<ChunkStream, ClientError> {
        let (strategy, response, pending) = self.send(messages, options, attempt, true).await?;

        if response.is_json() {
            debug!(model = %strategy.model, "streaming request answered with a JSON body");
            let text = self.json_instead_of_stream(response, &strategy).await?;
            self.meta.record(&text, pending.complete(&text));
            return Ok(stream::once(async move { Ok(StreamChunk::Final(text)) }).boxed());
        }

        let recorder = MetaRecorder {
            store: Arc::clone(&self.meta),
            pending,
        };
        Ok(consume_stream(response.body, strategy, Some(recorder)).boxed())
    }

    async fn json_instead_of_stream(
        &self,
        response: HttpResponse,
        strategy: &SchemaStrategy,
    ) -> Result<ResponseText, ClientError> {
        let status = response.status;
        let bytes = response.bytes().await?;
        let payload: Value = serde_json::from_slice(&bytes)?;

        if payload.get("error").is_some_and(|e| !e.is_null()) {
            return Err(ClientError::from_status(
                status,
                String::from_utf8_lossy(&bytes).into_owned(),
            ));
        }

        Ok(ResponseText::from(extract_payload(payload, strategy)?))
    }

    /// Build and send one request. Non-2xx responses become errors here.
    async fn send(
        &self,
        messages: &[Message],
        options: &CallOptions,
        attempt: &Attempt,
        stream: bool,
    ) -> Result<(SchemaStrategy, HttpResponse, PendingMeta), ClientError> {
        let strategy = choose_schema_strategy(attempt.model(options), options.schema.as_ref());
        let api_key = match &attempt.refreshed_key {
            Some(key) => key.clone(),
            None => resolve_api_key(options.api_key.as_ref(), self.keys.current(), &self.config)?,
        };

        let request = build_request(
            messages.to_vec(),
            &strategy,
            options,
            &api_key,
            &self.config,
            stream,
        )?;

        debug!(
            model = %strategy.model,
            strategy = %strategy.kind,
            stream,
            url = %request.url,
            "sending completion request"
        );
        let pending = PendingMeta::start(strategy.model.clone(), Some(request.url.clone()));
        let response = self.transport.send(request).await?;

        if !response.status.is_success() {
            let status = response.status;
            let body = response.text().await?;
            warn!(%status, model = %strategy.model, "provider returned an error status");
            return Err(ClientError::from_status(status, body));
        }

        Ok((strategy, response, pending))
    }

    /// Decide whether `error` earns another attempt, and with what changed.
    async fn recover(
        &self,
        error: ClientError,
        options: &CallOptions,
        mut attempt: Attempt,
    ) -> Result<Attempt, ClientError> {
        if error.is_invalid_model() && !options.skip_retry && !attempt.fallback_used {
            info!(
                model = ?attempt.model(options),
                fallback = FALLBACK_MODEL,
                "model rejected, retrying with fallback model"
            );
            attempt.fallback_used = true;
            attempt.model_override = Some(FALLBACK_MODEL.to_string());
            return Ok(attempt);
        }

        if error.needs_new_key() && !attempt.key_refreshed && self.keys.can_refresh() {
            attempt.key_refreshed = true;
            match self.keys.refresh().await {
                Ok(key) => {
                    info!(error = %error, "retrying with refreshed API key");
                    attempt.refreshed_key = Some(key);
                    return Ok(attempt);
                }
                Err(refresh_error) => {
                    warn!(error = %refresh_error, "key refresh failed");
                }
            }
        }

        Err(error)
    }
}

impl std::fmt::Debug for CallAi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallAi")
            .field("config", &self.config)
            .field("keys", &self.keys)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyRefresher;
    use crate::request::ChatRequest;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replays canned responses and records what was sent.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<(StatusCode, &'static str, String)>>,
        sent: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn reply(self, status: StatusCode, content_type: &'static str, body: impl Into<String>) -> Self {
            self.replies.lock().push_back((status, content_type, body.into()));
            self
        }

        fn sent(&self) -> Vec<ChatRequest> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: ChatRequest) -> Result<HttpResponse, ClientError> {
            self.sent.lock().push(request);
            let (status, content_type, body) = self
                .replies
                .lock()
                .pop_front()
                .expect("unexpected request");
            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
            Ok(HttpResponse::from_chunks(status, headers, vec![Bytes::from(body)]))
        }
    }

    struct FixedRefresher(&'static str);

    #[async_trait]
    impl KeyRefresher for FixedRefresher {
        async fn refresh(&self, _current: Option<SecretString>) -> Result<SecretString, ClientError> {
            Ok(SecretString::from(self.0))
        }
    }

    fn client(transport: Arc<ScriptedTransport>, keys: KeyStore) -> CallAi {
        CallAi::from_parts(
            Config::default().with_api_key("sk-env"),
            transport,
            Arc::new(keys),
        )
    }

    fn completion(text: &str) -> String {
        json!({"choices": [{"message": {"content": text}}]}).to_string()
    }

    #[test]
    fn test_invalid_model_phrasing() {
        assert!(is_invalid_model_message("foo is not a valid model ID"));
        assert!(is_invalid_model_message("Model Not Found"));
        assert!(is_invalid_model_message("INVALID MODEL requested"));
        assert!(!is_invalid_model_message("rate limit exceeded"));
    }

    #[test]
    fn test_from_status() {
        let err = ClientError::from_status(
            StatusCode::NOT_FOUND,
            r#"{"error":{"message":"Model not found: x/y"}}"#.into(),
        );
        assert!(matches!(err, ClientError::InvalidModel { status: 404, ref message } if message == "Model not found: x/y"));

        let err = ClientError::from_status(StatusCode::UNAUTHORIZED, "denied".into());
        assert!(err.needs_new_key());
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("Unauthorized"));

        let err = ClientError::from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert!(!err.needs_new_key());
        assert!(!err.is_invalid_model());
    }

    #[tokio::test]
    async fn test_fallback_runs_once() {
        let invalid = json!({"error": {"message": "x/y is not a valid model ID"}}).to_string();
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply(StatusCode::OK, "application/json", invalid.clone())
                .reply(StatusCode::OK, "application/json", invalid),
        );
        let client = client(transport.clone(), KeyStore::new());

        let text = client
            .call("hi", &CallOptions::new().with_model("x/y"))
            .await
            .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].body["model"], "x/y");
        assert_eq!(sent[1].body["model"], FALLBACK_MODEL);
        let envelope: Value = serde_json::from_str(text.as_str()).unwrap();
        assert!(envelope["message"].as_str().unwrap().contains("not a valid model"));
    }

    #[tokio::test]
    async fn test_skip_retry_disables_fallback() {
        let transport = Arc::new(ScriptedTransport::default().reply(
            StatusCode::NOT_FOUND,
            "application/json",
            r#"{"error":{"message":"invalid model"}}"#,
        ));
        let client = client(transport.clone(), KeyStore::new());

        let options = CallOptions::new().with_model("x/y").with_skip_retry(true);
        let err = client.call("hi", &options).await.unwrap_err();

        assert!(err.is_invalid_model());
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_and_retry_once() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply(StatusCode::UNAUTHORIZED, "application/json", "{}")
                .reply(StatusCode::OK, "application/json", completion("ok")),
        );
        let keys = KeyStore::with_refresher(Arc::new(FixedRefresher("sk-new")));
        let client = client(transport.clone(), keys);

        let text = client.call("hi", &CallOptions::new()).await.unwrap();

        assert_eq!(text.as_str(), "ok");
        let sent = transport.sent();
        assert_eq!(sent[0].headers.get(AUTHORIZATION).unwrap(), "Bearer sk-env");
        assert_eq!(sent[1].headers.get(AUTHORIZATION).unwrap(), "Bearer sk-new");
        assert_eq!(client.key_store().current().unwrap().expose_secret(), "sk-new");
    }

    #[tokio::test]
    async fn test_second_auth_failure_is_returned() {
        let transport = Arc::new(
            ScriptedTransport::default()
                .reply(StatusCode::UNAUTHORIZED, "application/json", "{}")
                .reply(StatusCode::FORBIDDEN, "application/json", "{}"),
        );
        let keys = KeyStore::with_refresher(Arc::new(FixedRefresher("sk-new")));
        let client = client(transport.clone(), keys);

        let err = client.call("hi", &CallOptions::new()).await.unwrap_err();
        assert_eq!(err.status(), Some(403));
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_records_metadata() {
        let transport = Arc::new(ScriptedTransport::default().reply(
            StatusCode::OK,
            "application/json",
            completion("hello"),
        ));
        let client = client(transport, KeyStore::new());

        let text = client
            .call("hi", &CallOptions::new().with_model("openai/gpt-4o-mini"))
            .await
            .unwrap();

        let meta = client.response_meta(&text).unwrap();
        assert_eq!(meta.model, "openai/gpt-4o-mini");
        assert_eq!(meta.endpoint.as_deref(), Some(crate::config::DEFAULT_CHAT_URL));
        assert_eq!(meta.raw_response.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_stream_answered_with_json_body() {
        let transport = Arc::new(ScriptedTransport::default().reply(
            StatusCode::OK,
            "application/json; charset=utf-8",
            completion("whole"),
        ));
        let client = client(transport, KeyStore::new());

        let chunks: Vec<_> = client
            .call_stream("hi", &CallOptions::new().with_stream(true))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 1);
        assert!(matches!(&chunks[0], Ok(StreamChunk::Final(text)) if text.as_str() == "whole"));
    }

    #[tokio::test]
    async fn test_streaming_sse_body() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let transport =
            Arc::new(ScriptedTransport::default().reply(StatusCode::OK, "text/event-stream", sse));
        let client = client(transport.clone(), KeyStore::new());

        let text = client
            .call("hi", &CallOptions::new().with_stream(true))
            .await
            .unwrap();

        assert_eq!(text.as_str(), "Hello");
        assert_eq!(transport.sent()[0].body["stream"], true);
        assert!(client.response_meta(&text).is_some());
    }

    #[tokio::test]
    async fn test_missing_key_without_refresher() {
        let transport = Arc::new(ScriptedTransport::default());
        let client = CallAi::from_parts(Config::default(), transport.clone(), Arc::new(KeyStore::new()));

        let err = client.call("hi", &CallOptions::new()).await.unwrap_err();
        assert!(matches!(err, ClientError::AuthRequired(_)));
        assert!(transport.sent().is_empty());
    }
}
