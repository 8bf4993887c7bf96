//! Unit tests for the NDJSON channel codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use codecell::kernel::codec::{ChannelCodec, MAX_LINE_BYTES};
use codecell::AppError;

#[test]
fn decodes_complete_line() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from("{\"msg_type\":\"status\"}\n");

    let line = codec.decode(&mut buf).expect("decode should succeed");
    assert_eq!(line.as_deref(), Some("{\"msg_type\":\"status\"}"));
}

#[test]
fn buffers_partial_line() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from("{\"msg_type\":");

    let line = codec.decode(&mut buf).expect("decode should succeed");
    assert!(line.is_none(), "incomplete line must keep buffering");

    buf.extend_from_slice(b"\"status\"}\n");
    let line = codec.decode(&mut buf).expect("decode should succeed");
    assert_eq!(line.as_deref(), Some("{\"msg_type\":\"status\"}"));
}

#[test]
fn decodes_multiple_lines_in_one_buffer() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from("one\ntwo\n");

    assert_eq!(
        codec.decode(&mut buf).expect("first line").as_deref(),
        Some("one")
    );
    assert_eq!(
        codec.decode(&mut buf).expect("second line").as_deref(),
        Some("two")
    );
    assert!(codec.decode(&mut buf).expect("no more lines").is_none());
}

#[test]
fn rejects_oversized_line() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from("x".repeat(MAX_LINE_BYTES + 2).as_str());

    let err = codec.decode(&mut buf).expect_err("oversized line must fail");
    assert!(
        matches!(err, AppError::Channel(ref msg) if msg.contains("line too long")),
        "expected Channel(line too long), got {err:?}"
    );
}

#[test]
fn encodes_with_newline_terminator() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::new();

    codec
        .encode("{\"code\":\"1+1\"}".to_owned(), &mut buf)
        .expect("encode should succeed");
    assert_eq!(&buf[..], b"{\"code\":\"1+1\"}\n");
}

#[test]
fn decode_eof_yields_final_unterminated_line() {
    let mut codec = ChannelCodec::new();
    let mut buf = BytesMut::from("tail-without-newline");

    let line = codec.decode_eof(&mut buf).expect("decode_eof should succeed");
    assert_eq!(line.as_deref(), Some("tail-without-newline"));
}
