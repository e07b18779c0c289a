// End-to-end scenario S6: malformed frame recovery. A single corrupted byte
// in the header-length field of one frame in a five-frame batch must not
// take down the other four; the decoder resyncs byte-by-byte and keeps
// counting errors under its threshold.

use kiro_proxy_core::frame::FrameDecoder;

fn encode_string_header(name: &str, value: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    out.push(7u8);
    out.extend_from_slice(&(value.len() as u16).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    out
}

fn encode_frame(event_type: &str, payload: &[u8]) -> Vec<u8> {
    let headers = encode_string_header(":event-type", event_type);
    let header_length = headers.len() as u32;
    let total_length = 16 + header_length + payload.len() as u32;
    let mut out = Vec::new();
    out.extend_from_slice(&total_length.to_be_bytes());
    out.extend_from_slice(&header_length.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&headers);
    out.extend_from_slice(payload);
    out.extend_from_slice(&0u32.to_be_bytes());
    out
}

#[test]
fn second_of_five_frames_corrupted_still_recovers_the_other_four() {
    let frames: Vec<Vec<u8>> = (1..=5)
        .map(|i| encode_frame("completion_chunk", format!("{{\"n\":{i}}}").as_bytes()))
        .collect();

    let mut corrupted = frames[1].clone();
    // Smash the header-length field (bytes 4..8) so this frame's header
    // block no longer lines up with its payload; the frame itself is still
    // a structurally valid total_length so it won't trigger byte-resync at
    // the outer loop, only the inner header/payload bounds check.
    corrupted[4] = 0xFF;
    corrupted[5] = 0xFF;

    let mut batch = Vec::new();
    batch.extend_from_slice(&frames[0]);
    batch.extend_from_slice(&corrupted);
    batch.extend_from_slice(&frames[2]);
    batch.extend_from_slice(&frames[3]);
    batch.extend_from_slice(&frames[4]);

    let mut decoder = FrameDecoder::new();
    let decoded = decoder.push(&batch).unwrap();

    // The corrupted frame's bytes are consumed but produce no DecodedFrame;
    // byte-by-byte resync inside that frame's span may also raise the error
    // counter, but the four well-formed frames still decode.
    assert_eq!(decoded.len(), 4);
    assert_eq!(&decoded[0].payload[..], br#"{"n":1}"#);
    assert_eq!(&decoded[1].payload[..], br#"{"n":3}"#);
    assert_eq!(&decoded[2].payload[..], br#"{"n":4}"#);
    assert_eq!(&decoded[3].payload[..], br#"{"n":5}"#);
    assert!(decoder.error_count() >= 1);
    assert!(decoder.error_count() < 10);
}

#[test]
fn errors_below_threshold_do_not_fail_the_batch() {
    // 8 leading zero bytes force 8 single-byte resync steps before the
    // decoder's sliding 4-byte window lines back up with the good frame's
    // total_length field; well under the default threshold of 10.
    let mut garbage = vec![0u8; 8];
    let good = encode_frame("completion", br#"{"ok":true}"#);
    garbage.extend_from_slice(&good);

    let mut decoder = FrameDecoder::new();
    let decoded = decoder.push(&garbage).unwrap();
    assert_eq!(decoded.len(), 1);
    assert!(decoder.error_count() >= 5);
    assert!(decoder.error_count() < 10);
}
