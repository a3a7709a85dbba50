//! Streaming response consumer.
//!
//! [`StreamProcessor`] is the synchronous per-frame state machine; it owns the
//! [`StreamAccumulator`] for one call. [`consume_stream`] drives it from a
//! response body, one network read at a time.
//!
//! Supported frame shapes:
//! - OpenAI-style `{"choices":[{"delta":{"content": ...}}]}`
//! - OpenAI-style tool calls `{"choices":[{"delta":{"tool_calls":[{"function":{"arguments": ...}}]}}]}`
//! - whole messages `{"choices":[{"message":{"content": ...}}]}`
//! - Claude content blocks `{"type":"content_block_delta","delta":{"type":"text_delta","text": ...}}`
//! - Claude tool use `{"content":[{"type":"tool_use","input":{...}}]}`

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::ClientError;
use crate::http::ByteStream;
use crate::meta::{MetaStore, PendingMeta};
use crate::model::{ResponseText, StreamChunk};
use crate::repair::repair_json;
use crate::sse::{is_done_marker, sse_frames};
use crate::strategies::SchemaStrategy;

/// Mutable state of one in-flight streaming call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamAccumulator {
    /// Concatenated text deltas
    pub complete_text: String,
    /// Concatenated tool-call argument fragments, verbatim
    pub tool_call_buffer: String,
    /// Parsed JSON frames seen so far
    pub chunk_count: usize,
}

/// Per-frame state machine for one streaming call.
#[derive(Debug)]
pub struct StreamProcessor {
    strategy: SchemaStrategy,
    acc: StreamAccumulator,
    tool_output_emitted: bool,
    final_text: Option<String>,
}

impl StreamProcessor {
    pub fn new(strategy: SchemaStrategy) -> Self {
        Self {
            strategy,
            acc: StreamAccumulator::default(),
            tool_output_emitted: false,
            final_text: None,
        }
    }

    pub fn accumulator(&self) -> &StreamAccumulator {
        &self.acc
    }

    /// Process one frame payload and return the values to emit, in order.
    ///
    /// Unparseable frames are logged and skipped. An in-band error frame ends
    /// the stream with [`ClientError::StreamProtocol`].
    pub fn process_frame(&mut self, payload: &str) -> Result<Vec<String>, ClientError> {
        if is_done_marker(payload) {
            return Ok(Vec::new());
        }

        let frame: Value = match serde_json::from_str(payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, payload, "skipping unparseable stream frame");
                return Ok(Vec::new());
            }
        };
        self.acc.chunk_count += 1;

        if let Some(message) = in_band_error(&frame) {
            return Err(ClientError::StreamProtocol {
                message,
                payload: payload.to_string(),
            });
        }

        let choice = frame.pointer("/choices/0");
        let finish_reason = choice
            .and_then(|c| c.get("finish_reason"))
            .and_then(Value::as_str);

        if self.strategy.is_tool_mode() {
            let fragments = choice
                .and_then(|c| c.pointer("/delta/tool_calls"))
                .and_then(Value::as_array);
            let saw_fragments = fragments.is_some();

            if !self.tool_output_emitted {
                for call in fragments.into_iter().flatten() {
                    if let Some(arguments) = call.pointer("/function/arguments").and_then(Value::as_str) {
                        self.acc.tool_call_buffer.push_str(arguments);
                    }
                }
            }

            if finish_reason == Some("tool_calls") {
                return Ok(self.complete_tool_call().into_iter().collect());
            }
            if saw_fragments {
                return Ok(Vec::new());
            }
        }

        if let Some(input) = tool_use_input(&frame) {
            let text = self.strategy.process_response(&input);
            self.acc.complete_text = text.clone();
            self.final_text = Some(text.clone());
            return Ok(vec![text]);
        }

        if self.final_text.is_some() {
            // structured output already delivered; trailing prose is not part of it
            return Ok(Vec::new());
        }

        match text_delta(&frame) {
            Some(delta) => {
                self.acc.complete_text.push_str(delta);
                if self.strategy.is_tool_mode() {
                    // partial tool JSON is not valid output
                    Ok(Vec::new())
                } else {
                    Ok(vec![self.strategy.process_response(&self.acc.complete_text)])
                }
            }
            None => Ok(Vec::new()),
        }
    }

    /// Validate, repair and hand out the assembled tool call, once.
    fn complete_tool_call(&mut self) -> Option<String> {
        if self.tool_output_emitted || self.acc.tool_call_buffer.is_empty() {
            return None;
        }

        let text = repair_json(&self.acc.tool_call_buffer);
        debug!(
            bytes = self.acc.tool_call_buffer.len(),
            "tool call arguments complete"
        );
        self.tool_output_emitted = true;
        self.final_text = Some(text.clone());
        Some(text)
    }

    /// Terminal value of the stream.
    ///
    /// A tool-call buffer that never saw its completion frame is repaired here.
    /// Fails if the stream carried no frames at all.
    pub fn finish(mut self) -> Result<String, ClientError> {
        if !self.tool_output_emitted && !self.acc.tool_call_buffer.is_empty() {
            self.complete_tool_call();
        }

        if let Some(text) = self.final_text {
            return Ok(text);
        }

        if self.acc.chunk_count == 0 {
            return Err(ClientError::MalformedPayload(
                "stream ended without any data frames".to_string(),
            ));
        }

        Ok(self.strategy.process_response(&self.acc.complete_text))
    }
}

/// Error message carried by a frame, if the frame reports one.
fn in_band_error(frame: &Value) -> Option<String> {
    if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
        return Some(error_message(error));
    }

    if frame.get("type").and_then(Value::as_str) == Some("error") {
        return Some(
            frame
                .get("message")
                .map(error_message)
                .unwrap_or_else(|| "provider reported an error".to_string()),
        );
    }

    let choice = frame.pointer("/choices/0")?;
    if choice.get("finish_reason").and_then(Value::as_str) == Some("error") {
        return Some(
            choice
                .get("error")
                .map(error_message)
                .unwrap_or_else(|| "generation finished with an error".to_string()),
        );
    }

    None
}

/// Human-readable message from `{message}`, a bare string, or anything else.
pub(crate) fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        Value::Object(object) => object
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Input of a `tool_use` content block, in the top-level, message or delta
/// position, serialized as JSON text.
fn tool_use_input(frame: &Value) -> Option<String> {
    let candidates = [
        frame.get("content"),
        frame.pointer("/choices/0/message/content"),
        frame.pointer("/choices/0/delta/content"),
    ];

    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .flatten()
        .find(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .and_then(|block| block.get("input"))
        .map(|input| match input {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
}

/// Text carried by a delta, whole message, or content-block delta frame.
fn text_delta(frame: &Value) -> Option<&str> {
    if let Some(text) = frame
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        return Some(text);
    }

    if let Some(text) = frame
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return Some(text);
    }

    if frame.get("type").and_then(Value::as_str) == Some("content_block_delta") {
        return frame.pointer("/delta/text").and_then(Value::as_str);
    }

    None
}

/// Records metadata for the terminal value of a stream.
#[derive(Debug)]
pub struct MetaRecorder {
    pub store: Arc<MetaStore>,
    pub pending: PendingMeta,
}

impl MetaRecorder {
    pub fn record(self, text: &ResponseText) {
        self.store.record(text, self.pending.complete(text));
    }
}

/// Consume a streaming response body.
///
/// Yields a [`StreamChunk::Partial`] for every value the frames produce, then
/// one [`StreamChunk::Final`]. Dropping the returned stream drops the body.
pub fn consume_stream(
    body: ByteStream,
    strategy: SchemaStrategy,
    recorder: Option<MetaRecorder>,
) -> impl Stream<Item = Result<StreamChunk, ClientError>> + Send {
    async_stream::try_stream! {
        let mut frames = Box::pin(sse_frames(body));
        let mut processor = StreamProcessor::new(strategy);

        while let Some(frame) = frames.next().await {
            let frame = frame?;
            for value in processor.process_frame(&frame)? {
                yield StreamChunk::Partial(value);
            }
        }

        debug!(frames = processor.accumulator().chunk_count, "stream complete");
        let text = ResponseText::from(processor.finish()?);
        if let Some(recorder) = recorder {
            recorder.record(&text);
        }
        yield StreamChunk::Final(text);
    }
}
