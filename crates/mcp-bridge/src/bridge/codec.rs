//! Newline-framed text codec for the child's stdio pipes.
//!
//! Wraps LinesCodec so reads and writes share one framing definition and
//! frame sizes show up in traces. Works over any AsyncRead/AsyncWrite.

use std::io;

use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Frames at or above this size are logged at info level.
const LARGE_FRAME_BYTES: usize = 100_000;

/// Codec that splits a byte stream on `\n` and yields UTF-8 lines.
///
/// Trailing `\r` is stripped on decode. Encoding appends a single `\n`.
pub struct LineCodec {
    inner: LinesCodec,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LineCodec {
    /// Codec with no upper bound on line length.
    pub fn new() -> Self {
        Self {
            inner: LinesCodec::new(),
        }
    }

    /// Codec that rejects lines longer than `max_length` bytes.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
        }
    }

    pub fn max_length(&self) -> usize {
        self.inner.max_length()
    }
}

fn into_io_error(err: LinesCodecError) -> io::Error {
    match err {
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line exceeds maximum length")
        }
        LinesCodecError::Io(e) => e,
    }
}

fn trace_frame(direction: &'static str, len: usize) {
    tracing::trace!(direction, frame_size_bytes = len, "Line frame");
    if len >= LARGE_FRAME_BYTES {
        tracing::info!(
            direction,
            frame_size_bytes = len,
            frame_size_kb = len / 1024,
            "Large line frame"
        );
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode(src).map_err(into_io_error)?;
        if let Some(ref l) = line {
            trace_frame("in", l.len());
        }
        Ok(line)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode_eof(src).map_err(into_io_error)?;
        if let Some(ref l) = line {
            trace_frame("in", l.len());
        }
        Ok(line)
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace_frame("out", item.len());
        self.inner.encode(item, dst).map_err(into_io_error)
    }
}
