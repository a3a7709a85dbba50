//! # callai - streaming completions and structured output
//!
//! A small client for OpenAI-compatible chat-completions endpoints (OpenRouter
//! by default) that returns plain text or schema-shaped JSON, whether the
//! provider answers with one body or an SSE stream.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Per-model-family schema strategies (tool calls, JSON schema, system prompt)
//! - Incremental SSE consumption with partial results
//! - Repair of truncated tool-call JSON
//! - Fallback to a known-good model and API key refresh, once each per call
//! - Response metadata (model, timing) kept beside each result
//!
//! ## Architecture
//!
//! A call flows through:
//!
//! 1. [`strategies`] picks how the model is asked for structured output
//! 2. [`request`] shapes the wire request
//! 3. [`http::HttpTransport`] sends it
//! 4. [`stream`] or [`extract`] turns the response into text
//! 5. [`meta`] records metadata for the result
//!
//! [`client::CallAi`] drives the pipeline and owns the retry policy.
//!
//! ## Example
//! ```no_run
//! use callai::{CallAi, CallOptions, Config, Schema, StreamChunk};
//! use futures::StreamExt;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CallAi::new(Config::load())?;
//!
//!     let schema: Schema = serde_json::from_value(json!({
//!         "name": "city",
//!         "properties": {
//!             "name": {"type": "string"},
//!             "population": {"type": "number"}
//!         }
//!     }))?;
//!     let options = CallOptions::new()
//!         .with_model("openai/gpt-4o")
//!         .with_schema(schema)
//!         .with_stream(true);
//!
//!     let mut chunks = client.call_stream("Describe Paris", &options).await?;
//!     while let Some(chunk) = chunks.next().await {
//!         match chunk? {
//!             StreamChunk::Partial(text) => eprintln!("... {text}"),
//!             StreamChunk::Final(text) => println!("{text}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod extract;
pub mod http;
pub mod keys;
pub mod meta;
pub mod model;
pub mod options;
pub mod repair;
pub mod request;
pub mod sse;
pub mod strategies;
pub mod stream;

// Re-exports for convenience
pub use client::{CallAi, ClientError};
pub use config::Config;
pub use keys::{KeyRefresher, KeyStore};
pub use meta::ResponseMeta;
pub use model::{Message, Prompt, ResponseText, Role, Schema, StreamChunk};
pub use options::{CallOptions, SecretString};
