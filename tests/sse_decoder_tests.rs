//! Behavioral and property tests for the SSE frame decoder.
//!
//! The central property: frame parsing is split-invariant. However the byte
//! stream is fragmented — mid-field, mid-line, mid-event — the decoder emits
//! the identical ordered list of events.

use proptest::prelude::*;
use serde_json::{json, Value};
use voicestream::{RawFrame, SseDecoder};

/// Decode a whole stream fed as a single fragment, with residual flush.
fn decode_whole(input: &str) -> Vec<RawFrame> {
    let mut decoder = SseDecoder::new();
    let mut frames = decoder.feed(input);
    frames.extend(decoder.finish());
    frames
}

/// Decode the same stream split at the given byte offsets.
fn decode_split(input: &str, mut offsets: Vec<usize>) -> Vec<RawFrame> {
    offsets.retain(|&o| o < input.len() && input.is_char_boundary(o));
    offsets.sort_unstable();
    offsets.dedup();

    let mut decoder = SseDecoder::new();
    let mut frames = Vec::new();
    let mut prev = 0;
    for offset in offsets {
        frames.extend(decoder.feed(&input[prev..offset]));
        prev = offset;
    }
    frames.extend(decoder.feed(&input[prev..]));
    frames.extend(decoder.finish());
    frames
}

const SAMPLE_STREAM: &str = concat!(
    "event: connected\ndata: {\"ok\":true}\n\n",
    "event: text\ndata: {\"content\":\"Hello\"}\n\n",
    "event: audio\ndata: {\"chunk\":\"AAAA\",\"sequence\":0}\n\n",
    "event: status\ndata: thinking hard\n\n",
    "event: suggestions\ndata: {\"items\":[\"a\",\"b\"]}\n\n",
    "event: done\ndata: {\"fullAnswer\":\"Hello\",\"metrics\":{\"t\":12}}\n\n",
);

#[test]
fn test_whole_stream_decodes_in_order() {
    let frames = decode_whole(SAMPLE_STREAM);
    let events: Vec<&str> = frames.iter().map(|f| f.event.as_str()).collect();
    assert_eq!(events, vec!["connected", "text", "audio", "status", "suggestions", "done"]);
}

#[test]
fn test_byte_at_a_time_matches_whole() {
    let expected = decode_whole(SAMPLE_STREAM);
    let offsets: Vec<usize> = (1..SAMPLE_STREAM.len()).collect();
    assert_eq!(decode_split(SAMPLE_STREAM, offsets), expected);
}

#[test]
fn test_split_inside_terminator() {
    let input = "event: text\ndata: \"a\"\n\nevent: text\ndata: \"b\"\n\n";
    let expected = decode_whole(input);
    // Split exactly between the two newlines of the first terminator.
    let pos = input.find("\n\n").unwrap() + 1;
    assert_eq!(decode_split(input, vec![pos]), expected);
}

#[test]
fn test_large_payload_spanning_many_fragments() {
    let big: String = "x".repeat(64 * 1024);
    let input = format!("event: text\ndata: {{\"content\":\"{big}\"}}\n\n");
    let expected = decode_whole(&input);

    let offsets: Vec<usize> = (0..input.len()).step_by(7).collect();
    let frames = decode_split(&input, offsets);
    assert_eq!(frames, expected);
    assert_eq!(frames[0].data["content"].as_str().unwrap().len(), big.len());
}

#[test]
fn test_missing_final_terminator_recovered_by_finish() {
    let input = "event: text\ndata: \"a\"\n\nevent: done\ndata: {}";
    let frames = decode_whole(input);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].event, "done");
}

#[test]
fn test_invalid_json_payload_degrades_to_string() {
    let frames = decode_whole("event: error\ndata: {broken json!\n\n");
    assert_eq!(frames[0].data, Value::String("{broken json!".to_string()));
}

#[test]
fn test_empty_input_yields_nothing() {
    assert!(decode_whole("").is_empty());
    assert!(decode_whole("\n\n\n\n").is_empty());
}

#[test]
fn test_split_inside_multibyte_character() {
    // "héllo" — the é spans two bytes; splitting between them must not
    // corrupt framing (the lossy decode may degrade at non-boundaries, so
    // only char-boundary splits are compared exactly; here we split right
    // before the é).
    let input = "event: text\ndata: {\"content\":\"héllo\"}\n\n";
    let expected = decode_whole(input);
    let boundary = input.find('é').unwrap();
    assert_eq!(decode_split(input, vec![boundary]), expected);
}

proptest! {
    /// For all fragmentations of the same byte stream, the decoder emits an
    /// identical ordered list of events.
    #[test]
    fn prop_frame_parsing_is_split_invariant(
        offsets in prop::collection::vec(0..SAMPLE_STREAM.len(), 0..12),
    ) {
        let expected = decode_whole(SAMPLE_STREAM);
        prop_assert_eq!(decode_split(SAMPLE_STREAM, offsets), expected);
    }

    /// For all event/data pairs where data is not valid JSON, the decoder
    /// emits the raw string rather than raising.
    #[test]
    fn prop_non_json_data_kept_raw(
        event in "[a-z]{1,12}",
        data in "[A-Za-z !?,;]{1,40}",
    ) {
        prop_assume!(serde_json::from_str::<Value>(&data).is_err());
        let input = format!("event: {event}\ndata: {data}\n\n");
        let frames = decode_whole(&input);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(&frames[0].event, &event);
        prop_assert_eq!(&frames[0].data, &Value::String(data));
    }

    /// JSON payloads survive any fragmentation intact.
    #[test]
    fn prop_json_payload_roundtrips_under_splits(
        content in "[a-zA-Z0-9 ]{0,60}",
        offsets in prop::collection::vec(0usize..200, 0..6),
    ) {
        let input = format!("event: text\ndata: {}\n\n", json!({ "content": content }));
        let frames = decode_split(&input, offsets);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].data["content"].as_str(), Some(content.as_str()));
    }
}
