//! Resilient SSE frame decoding.
//!
//! The response body arrives as arbitrary byte fragments: a single fragment
//! may carry several complete frames (throughput bursts), and one frame may
//! span many fragments (large JSON payloads). [`SseDecoder`] accumulates
//! fragments into a text buffer and emits every fully terminated frame it
//! holds, so frame parsing is invariant under how the bytes were split.

use crate::error::{Result, StreamError};
use crate::events::{RawFrame, StreamEvent};
use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::Value;
use std::pin::Pin;

/// Default event type when a frame has no `event:` field.
const DEFAULT_EVENT: &str = "message";

/// Incremental decoder for `field: value` frames terminated by a blank line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one text fragment and drain every complete frame.
    ///
    /// Fragments may split mid-field, mid-line or mid-event; the decoder only
    /// emits once the `\n\n` terminator for a frame has arrived.
    pub fn feed(&mut self, fragment: &str) -> Vec<RawFrame> {
        self.buffer.push_str(fragment);

        let mut frames = Vec::new();
        while let Some((end, len)) = find_terminator(&self.buffer) {
            let block: String = self.buffer.drain(..end + len).collect();
            if let Some(frame) = parse_frame(&block) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flush the residual buffer as a final frame.
    ///
    /// Some servers omit the trailing blank line on the last frame; called at
    /// end-of-stream to avoid losing it.
    pub fn finish(&mut self) -> Option<RawFrame> {
        let rest = std::mem::take(&mut self.buffer);
        parse_frame(&rest)
    }

    /// Number of buffered bytes awaiting a terminator.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Locate the earliest frame terminator, LF-LF or CRLF-CRLF.
///
/// Returns the terminator's byte offset and length.
fn find_terminator(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|i| (i, 2));
    let crlf = buffer.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Parse one frame block into a raw frame.
///
/// Returns `None` for blocks with no recognized fields (keep-alive comments,
/// stray blank lines). Multiple `data:` lines are joined with `\n` before the
/// JSON parse attempt; a payload that is not valid JSON is kept as a raw
/// string rather than raising.
fn parse_frame(block: &str) -> Option<RawFrame> {
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();

    for line in block.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.starts_with(':') {
            // Comment line per the SSE contract.
            continue;
        }
        if let Some(value) = line.strip_prefix("event:") {
            event = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }

    let raw = data_lines.join("\n");
    let data = match serde_json::from_str::<Value>(&raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!("SSE data is not JSON, keeping raw string: {err}");
            Value::String(raw)
        }
    };

    Some(RawFrame { event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()), data })
}

/// Adapt a fallible byte stream into a stream of typed events.
///
/// Transport failures terminate the stream with a single `Err` item; they are
/// a connection-level condition, never an event. Fragments are decoded with
/// `from_utf8_lossy`, so a multi-byte code point split across fragments can
/// degrade that one character but never breaks framing (the frame syntax is
/// ASCII).
pub fn decode_events<S>(byte_stream: S) -> Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut byte_stream = std::pin::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(StreamError::connection(format!("Stream read error: {e}")));
                    return;
                }
            };

            let text = String::from_utf8_lossy(&chunk);
            for frame in decoder.feed(&text) {
                yield Ok(StreamEvent::from_frame(frame));
            }
        }

        if let Some(frame) = decoder.finish() {
            yield Ok(StreamEvent::from_frame(frame));
        }
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_complete_frame() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("event: text\ndata: {\"content\":\"Hello\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "text");
        assert_eq!(frames[0].data, json!({"content": "Hello"}));
    }

    #[test]
    fn test_frame_split_across_fragments() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("event: te").is_empty());
        assert!(decoder.feed("xt\ndata: {\"content\":").is_empty());
        let frames = decoder.feed("\"Hi\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, json!({"content": "Hi"}));
    }

    #[test]
    fn test_multiple_frames_in_one_fragment() {
        let mut decoder = SseDecoder::new();
        let frames =
            decoder.feed("event: a\ndata: 1\n\nevent: b\ndata: 2\n\nevent: c\ndata: 3\n\n");
        let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(events, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_non_json_data_kept_as_string() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("event: status\ndata: not json at all\n\n");
        assert_eq!(frames[0].data, Value::String("not json at all".to_string()));
    }

    #[test]
    fn test_missing_event_defaults_to_message() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("data: {\"x\":1}\n\n");
        assert_eq!(frames[0].event, "message");
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("event: status\ndata: line one\ndata: line two\n\n");
        assert_eq!(frames[0].data, Value::String("line one\nline two".to_string()));
    }

    #[test]
    fn test_comment_lines_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(": keep-alive\n\nevent: text\ndata: \"x\"\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "text");
    }

    #[test]
    fn test_crlf_line_endings_tolerated() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("event: text\r\ndata: \"hi\"\r\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, json!("hi"));
    }

    #[test]
    fn test_full_crlf_framing() {
        let mut decoder = SseDecoder::new();
        let frames =
            decoder.feed("event: a\r\ndata: 1\r\n\r\nevent: b\r\ndata: 2\r\n\r\n");
        let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
        assert_eq!(events, vec!["a", "b"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed("event: done\ndata: {\"fullAnswer\":\"x\"}").is_empty());
        let frame = decoder.finish().expect("residual frame");
        assert_eq!(frame.event, "done");
        assert_eq!(frame.data, json!({"fullAnswer": "x"}));
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_finish_empty_buffer_is_none() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_field_without_space_after_colon() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed("event:text\ndata:\"tight\"\n\n");
        assert_eq!(frames[0].event, "text");
        assert_eq!(frames[0].data, json!("tight"));
    }
}
