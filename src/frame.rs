// src/frame.rs
// Binary length-prefixed, header-tagged event-stream decoder (§4.A).
//
// Grounded on the teacher's `advisory/providers/opus.rs` SSE line-parser
// shape (stateful decoder holding a growable buffer, emitting zero or more
// complete units per call and retaining the trailing partial) adapted to a
// binary, rather than line-delimited, framing.

use std::collections::HashMap;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{CoreError, CoreResult};

const MIN_FRAME_LEN: u32 = 16;
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;
const DEFAULT_ERROR_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    String(String),
}

#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub headers: HashMap<String, HeaderValue>,
    pub payload: Bytes,
}

impl DecodedFrame {
    pub fn message_type(&self) -> &str {
        self.header_str(":message-type").unwrap_or("event")
    }

    pub fn event_type(&self) -> &str {
        self.header_str(":event-type")
            .unwrap_or("assistantResponseEvent")
    }

    pub fn content_type(&self) -> &str {
        self.header_str(":content-type").unwrap_or("application/json")
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(HeaderValue::String(s)) => Some(s.as_str()),
            None => None,
        }
    }
}

fn default_header_map() -> HashMap<String, HeaderValue> {
    let mut map = HashMap::new();
    map.insert(
        ":message-type".to_string(),
        HeaderValue::String("event".to_string()),
    );
    map.insert(
        ":event-type".to_string(),
        HeaderValue::String("assistantResponseEvent".to_string()),
    );
    map.insert(
        ":content-type".to_string(),
        HeaderValue::String("application/json".to_string()),
    );
    map
}

/// Decodes a single stream of frames. Not `Sync`; callers must serialize
/// access to one instance per upstream stream (§4.A "single-consumer").
pub struct FrameDecoder {
    buf: BytesMut,
    error_count: u32,
    error_threshold: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            error_count: 0,
            error_threshold: DEFAULT_ERROR_THRESHOLD,
        }
    }

    pub fn with_error_threshold(error_threshold: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            error_count: 0,
            error_threshold,
        }
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    /// Append newly-received bytes and decode as many complete frames as
    /// are available. Trailing partial bytes are retained for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> CoreResult<Vec<DecodedFrame>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.buf.len() < 4 {
                break;
            }
            let total_length = u32::from_be_bytes(self.buf[0..4].try_into().unwrap());

            if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_length) {
                self.buf.advance(1);
                self.error_count += 1;
                self.check_threshold()?;
                continue;
            }

            if (self.buf.len() as u64) < total_length as u64 {
                break;
            }

            match self.decode_one(total_length) {
                Some(frame) => frames.push(frame),
                None => {
                    self.error_count += 1;
                    self.check_threshold()?;
                }
            }
        }

        Ok(frames)
    }

    fn check_threshold(&self) -> CoreResult<()> {
        if self.error_count > self.error_threshold {
            return Err(CoreError::parse_recoverable(format!(
                "frame decode error count {} exceeded threshold {}",
                self.error_count, self.error_threshold
            )));
        }
        Ok(())
    }

    /// Decode exactly one frame of `total_length` bytes, already known to be
    /// fully buffered; always consumes `total_length` bytes from `self.buf`.
    /// Returns `None` (and still consumes) on an inconsistent header block.
    fn decode_one(&mut self, total_length: u32) -> Option<DecodedFrame> {
        let frame_bytes = self.buf.split_to(total_length as usize).freeze();
        let header_length = u32::from_be_bytes(frame_bytes[4..8].try_into().unwrap());

        let header_start = 12usize;
        let header_end = header_start.checked_add(header_length as usize)?;
        let payload_end = (total_length as usize).checked_sub(4)?; // trailing CRC

        if header_end > payload_end || payload_end > frame_bytes.len() {
            return None;
        }

        let header_bytes = &frame_bytes[header_start..header_end];
        let headers = match decode_headers(header_bytes) {
            Some(map) if !header_bytes.is_empty() => map,
            _ => default_header_map(),
        };

        let payload = frame_bytes.slice(header_end..payload_end);

        Some(DecodedFrame { headers, payload })
    }
}

/// Decode the `(name_len, name, type, value)*` header sequence. Returns
/// `None` if any header is not the string type (7) or bounds are
/// inconsistent, in which case the caller falls back to the default map.
fn decode_headers(mut bytes: &[u8]) -> Option<HashMap<String, HeaderValue>> {
    let mut map = HashMap::new();

    while !bytes.is_empty() {
        let name_len = bytes[0] as usize;
        bytes = &bytes[1..];
        if bytes.len() < name_len + 1 {
            return None;
        }
        let name = std::str::from_utf8(&bytes[..name_len]).ok()?.to_string();
        bytes = &bytes[name_len..];

        let header_type = bytes[0];
        bytes = &bytes[1..];

        if header_type != 7 {
            return None;
        }

        if bytes.len() < 2 {
            return None;
        }
        let value_len = u16::from_be_bytes(bytes[0..2].try_into().unwrap()) as usize;
        bytes = &bytes[2..];
        if bytes.len() < value_len {
            return None;
        }
        let value = std::str::from_utf8(&bytes[..value_len]).ok()?.to_string();
        bytes = &bytes[value_len..];

        map.insert(name, HeaderValue::String(value));
    }

    Some(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_string_header(name: &str, value: &str) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(name.len() as u8);
        out.extend_from_slice(name.as_bytes());
        out.push(7u8);
        out.extend_from_slice(&(value.len() as u16).to_be_bytes());
        out.extend_from_slice(value.as_bytes());
        out
    }

    fn encode_frame(headers: &[u8], payload: &[u8]) -> Vec<u8> {
        let header_length = headers.len() as u32;
        let total_length = 16 + header_length + payload.len() as u32;
        let mut out = Vec::new();
        out.extend_from_slice(&total_length.to_be_bytes());
        out.extend_from_slice(&header_length.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // prelude crc, unvalidated
        out.extend_from_slice(headers);
        out.extend_from_slice(payload);
        out.extend_from_slice(&0u32.to_be_bytes()); // trailing crc, unvalidated
        out
    }

    #[test]
    fn decodes_single_frame_with_headers() {
        let headers = encode_string_header(":event-type", "completion_chunk");
        let frame = encode_frame(&headers, br#"{"content":"hi"}"#);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&frame).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type(), "completion_chunk");
        assert_eq!(&frames[0].payload[..], br#"{"content":"hi"}"#);
    }

    #[test]
    fn empty_header_block_uses_default_map() {
        let frame = encode_frame(&[], b"{}");
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&frame).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].message_type(), "event");
        assert_eq!(frames[0].event_type(), "assistantResponseEvent");
        assert_eq!(frames[0].content_type(), "application/json");
    }

    #[test]
    fn non_string_header_type_falls_back_to_default() {
        let mut headers = Vec::new();
        headers.push(3u8);
        headers.extend_from_slice(b"foo");
        headers.push(4u8); // int32 type, not supported
        headers.extend_from_slice(&1i32.to_be_bytes());
        let frame = encode_frame(&headers, b"{}");

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&frame).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type(), "assistantResponseEvent");
    }

    #[test]
    fn total_length_16_decodes_with_empty_payload() {
        let frame = encode_frame(&[], b"");
        assert_eq!(frame.len(), 16);
        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&frame).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn retains_partial_bytes_across_calls() {
        let headers = encode_string_header(":event-type", "completion");
        let frame = encode_frame(&headers, b"{}");

        let mut decoder = FrameDecoder::new();
        let (first, second) = frame.split_at(frame.len() - 3);
        assert!(decoder.push(first).unwrap().is_empty());
        let frames = decoder.push(second).unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn invalid_length_triggers_byte_resync() {
        let mut bad = Vec::new();
        bad.extend_from_slice(&0u32.to_be_bytes()); // invalid: below MIN_FRAME_LEN
        let headers = encode_string_header(":event-type", "completion");
        let good = encode_frame(&headers, b"{}");
        bad.extend_from_slice(&good);

        let mut decoder = FrameDecoder::new();
        let frames = decoder.push(&bad).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(decoder.error_count() >= 1);
    }

    #[test]
    fn decoding_is_idempotent_over_arbitrary_partitions() {
        let h1 = encode_string_header(":event-type", "completion_chunk");
        let f1 = encode_frame(&h1, b"{\"a\":1}");
        let h2 = encode_string_header(":event-type", "completion");
        let f2 = encode_frame(&h2, b"{\"b\":2}");
        let mut all = f1.clone();
        all.extend_from_slice(&f2);

        let mut whole = FrameDecoder::new();
        let whole_frames = whole.push(&all).unwrap();

        let mut split = FrameDecoder::new();
        let mut split_frames = Vec::new();
        for byte in &all {
            split_frames.extend(split.push(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(whole_frames.len(), split_frames.len());
        for (a, b) in whole_frames.iter().zip(split_frames.iter()) {
            assert_eq!(a.event_type(), b.event_type());
            assert_eq!(a.payload, b.payload);
        }
    }

    #[test]
    fn error_threshold_exceeded_is_terminal() {
        let mut garbage = Vec::new();
        for _ in 0..12 {
            garbage.extend_from_slice(&0u32.to_be_bytes());
        }
        let mut decoder = FrameDecoder::with_error_threshold(10);
        let result = decoder.push(&garbage);
        assert!(result.is_err());
    }
}
