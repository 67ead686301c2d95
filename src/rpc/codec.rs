//! NDJSON codec for backend RPC streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length to prevent memory exhaustion caused by unterminated or maliciously
//! large messages from a misbehaving backend process.
//!
//! # Usage
//!
//! Use [`RpcCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).  Both directions use
//! UTF-8 line framing delimited by `\n`.
//!
//! Per-line problems (over-long lines, invalid UTF-8) are surfaced as
//! [`Frame::Skipped`] rather than decoder errors: a decoder error ends a
//! `FramedRead` stream, and one bad line must never end the session.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the RPC codec: 8 MiB.
///
/// Backend frames carry full command output and diffs, so the limit is
/// generous; lines beyond it are discarded up to the next newline.
pub const MAX_LINE_BYTES: usize = 8 * 1_048_576;

/// One decoded unit of the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete newline-terminated line (without the terminator).
    Line(String),
    /// A line that could not be framed and was discarded.
    Skipped(String),
}

/// NDJSON codec for bidirectional backend streams.
///
/// Delegates line-framing to [`LinesCodec`] with a fixed
/// [`MAX_LINE_BYTES`] limit.  Each newline-terminated (`\n`) UTF-8 string
/// is one complete RPC message.
///
/// # Decoder
///
/// Partial trailing data stays buffered in the `FramedRead` buffer until the
/// terminating newline arrives.  Over-long lines and invalid UTF-8 yield
/// [`Frame::Skipped`].  Underlying reader failures reach the caller as
/// [`AppError::Io`] through the `From<std::io::Error>` conversion.
///
/// # Encoder
///
/// Outbound strings are encoded as `item\n`.
#[derive(Debug)]
pub struct RpcCodec(LinesCodec);

impl RpcCodec {
    /// Create a new `RpcCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom maximum line length.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max_length))
    }
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RpcCodec {
    type Item = Frame;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Ok(map_decoded(self.0.decode(src)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Ok(map_decoded(self.0.decode_eof(src)))
    }
}

impl Encoder<String> for RpcCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.0
            .encode(item, dst)
            .map_err(|e| AppError::Rpc(format!("encode failed: {e}")))
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

/// Turn a [`LinesCodec`] result into a frame, downgrading per-line errors.
///
/// The inner codec only raises `Io` for lines that are not valid UTF-8; the
/// offending line has already been consumed from the buffer by then.
fn map_decoded(
    decoded: std::result::Result<Option<String>, LinesCodecError>,
) -> Option<Frame> {
    match decoded {
        Ok(line) => line.map(Frame::Line),
        Err(LinesCodecError::MaxLineLengthExceeded) => Some(Frame::Skipped(format!(
            "line too long: exceeded {MAX_LINE_BYTES} bytes"
        ))),
        Err(LinesCodecError::Io(err)) => Some(Frame::Skipped(format!("undecodable line: {err}"))),
    }
}
