//! NDJSON codec for kernel channel streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a fixed maximum line length
//! so an unterminated or runaway line from a misbehaving kernel process
//! cannot exhaust server memory.
//!
//! Use [`ChannelCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (broadcast channel, kernel stdout) and
//! [`tokio_util::codec::FramedWrite`] (control channel, kernel stdin). Both
//! directions enforce UTF-8 line framing delimited by `\n`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted on a kernel channel: 1 MiB.
///
/// Inbound lines beyond this limit cause [`ChannelCodec::decode`] to return
/// [`AppError::Channel`] with `"line too long"` instead of allocating.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// NDJSON codec for bidirectional kernel channel streams.
///
/// Delegates line framing to [`LinesCodec`] with the fixed
/// [`MAX_LINE_BYTES`] limit. Each newline-terminated UTF-8 string is one
/// complete channel message. The length limit is a decoder-side concern and
/// is not enforced while encoding.
#[derive(Debug)]
pub struct ChannelCodec(LinesCodec);

impl ChannelCodec {
    /// Create a new `ChannelCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for ChannelCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ChannelCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` while `src` holds no complete line yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final unterminated line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for ChannelCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Channel(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
