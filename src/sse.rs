//! Server-Sent Events (SSE) stream processing utilities.
//!
//! SSE format:
//! ```text
//! data: {"key": "value"}
//!
//! data: {"another": "event"}
//!
//! data: [DONE]
//! ```
//!
//! Network reads can split a frame, or a multi-byte character, anywhere.
//! [`SseDecoder`] keeps the unfinished tail of both across reads.

use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

use crate::client::ClientError;
use crate::http::ByteStream;

/// Incremental UTF-8 decoder that holds back a character split across reads.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `pending + chunk` as forms complete characters.
    /// Invalid sequences become U+FFFD.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete trailing character, wait for the next read
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                    }
                }
            }
        }

        out
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

/// Splits decoded text into blank-line separated frames.
///
/// `\r\n` and a lone `\r` end a line just like `\n`. A `\r` at the end of a
/// read is held until the next one shows whether a `\n` follows it.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buffer: String,
    pending_cr: bool,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every frame completed by it. The text after the
    /// last separator stays buffered.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.push_normalized(text);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            frames.push(self.buffer[..pos].to_string());
            self.buffer.drain(..pos + 2);
        }
        frames
    }

    fn push_normalized(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut chars = text.chars().peekable();

        if std::mem::take(&mut self.pending_cr) {
            self.buffer.push('\n');
            chars.next_if_eq(&'\n');
        }

        while let Some(c) = chars.next() {
            if c != '\r' {
                self.buffer.push(c);
                continue;
            }
            match chars.peek() {
                Some('\n') => {
                    chars.next();
                    self.buffer.push('\n');
                }
                Some(_) => self.buffer.push('\n'),
                None => self.pending_cr = true,
            }
        }
    }

    /// Take the unterminated final frame, if it has any content.
    pub fn finish(&mut self) -> Option<String> {
        self.pending_cr = false;
        let rest = std::mem::take(&mut self.buffer);
        (!rest.trim().is_empty()).then_some(rest)
    }
}

/// Bytes in, complete SSE frames out.
#[derive(Debug, Default)]
pub struct SseDecoder {
    utf8: Utf8Decoder,
    frames: FrameSplitter,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.utf8.decode(chunk);
        self.frames.push(&text)
    }

    pub fn finish(&mut self) -> Vec<String> {
        let text = self.utf8.finish();
        let mut frames = self.frames.push(&text);
        frames.extend(self.frames.finish());
        frames
    }
}

/// Payload of a frame's `data: ` lines, joined by newlines. `None` for frames
/// without data (comments, bare `event:` lines).
pub fn frame_data(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| parse_sse_line(line.trim_end_matches('\r')))
        .collect();

    (!lines.is_empty()).then(|| lines.join("\n"))
}

/// Turn a response body into a stream of frame payloads.
///
/// One network read is issued only after every frame from the previous read
/// has been consumed. `[DONE]` is passed through; the consumer decides what
/// it means.
pub fn sse_frames(body: ByteStream) -> impl Stream<Item = Result<String, ClientError>> + Send {
    stream::unfold(
        (body, SseDecoder::new(), VecDeque::<String>::new(), false),
        |(mut body, mut decoder, mut ready, mut ended)| async move {
            loop {
                if let Some(frame) = ready.pop_front() {
                    match frame_data(&frame) {
                        Some(data) => return Some((Ok(data), (body, decoder, ready, ended))),
                        None => continue,
                    }
                }

                if ended {
                    return None;
                }

                match body.next().await {
                    Some(Ok(chunk)) => ready.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        ended = true;
                        return Some((Err(e), (body, decoder, ready, ended)));
                    }
                    None => {
                        ended = true;
                        ready.extend(decoder.finish());
                    }
                }
            }
        },
    )
}

/// Parse an SSE line to extract the data portion.
///
/// SSE lines are in the format: `data: <content>`
///
/// # Example
/// ```
/// use callai::sse::parse_sse_line;
///
/// let line = "data: {\"key\": \"value\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"key\": \"value\"}"));
///
/// let line = "invalid";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix("data: ").map(|s| s.trim())
}

/// Check if an SSE data line indicates the stream is done.
///
/// # Example
/// ```
/// use callai::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker(""));
/// assert!(!is_done_marker("{\"data\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == "[DONE]"
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: hello"), Some("hello"));
        assert_eq!(
            parse_sse_line("data: {\"key\": \"value\"}"),
            Some("{\"key\": \"value\"}")
        );
        assert_eq!(parse_sse_line("data:   spaces  "), Some("spaces"));
        assert_eq!(parse_sse_line("data:nospace"), None);
        assert_eq!(parse_sse_line("invalid"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn test_is_done_marker() {
        assert!(is_done_marker("[DONE]"));
        assert!(!is_done_marker(""));
        assert!(!is_done_marker("data"));
        assert!(!is_done_marker("{\"key\": \"value\"}"));
    }

    #[test]
    fn test_utf8_decoder_holds_split_character() {
        let bytes = "café".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 1);

        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(head), "caf");
        assert_eq!(decoder.decode(tail), "é");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn test_utf8_decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::new();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_frame_splitter_keeps_partial_frame() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.push("data: 1\n").is_empty());
        assert_eq!(splitter.push("\ndata: 2\n\ndata: 3"), vec!["data: 1", "data: 2"]);
        assert_eq!(splitter.finish().as_deref(), Some("data: 3"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_frame_splitter_handles_crlf_and_cr() {
        let mut splitter = FrameSplitter::new();
        assert!(splitter.push("data: 1\r").is_empty());
        assert_eq!(
            splitter.push("\n\r\ndata: 2\r\n\r"),
            vec!["data: 1"]
        );
        assert_eq!(splitter.push("\ndata: 3\r\rdata: 4"), vec!["data: 2", "data: 3"]);
        assert_eq!(splitter.finish().as_deref(), Some("data: 4"));
    }

    #[test]
    fn test_frame_data() {
        assert_eq!(frame_data("data: {\"a\":1}").as_deref(), Some("{\"a\":1}"));
        assert_eq!(frame_data("\ndata: [DONE]").as_deref(), Some("[DONE]"));
        assert_eq!(frame_data("event: ping\r\ndata: x\r").as_deref(), Some("x"));
        assert_eq!(frame_data(": keep-alive"), None);
        assert_eq!(frame_data("data:{}"), None);
    }

    #[tokio::test]
    async fn test_sse_frames_across_reads() {
        let chunks = vec![
            Bytes::from_static(b"data: one\n"),
            Bytes::from_static(b"\n: comment\n\nda"),
            Bytes::from_static(b"ta: two\n\ndata: [DONE]\n\ndata: tail"),
        ];
        let body = stream::iter(chunks.into_iter().map(Ok)).boxed();

        let frames: Vec<String> = sse_frames(body)
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(frames, vec!["one", "two", "[DONE]", "tail"]);
    }

    #[tokio::test]
    async fn test_sse_frames_surfaces_read_error() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: ok\n\n")),
            Err(ClientError::MalformedPayload("connection reset".into())),
        ])
        .boxed();

        let items: Vec<_> = sse_frames(body).collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "ok");
        assert!(items[1].is_err());
    }
}
