//! Stream decoder.
//!
//! Turns the raw response body into a lazy sequence of [`StreamEvent`]s.
//! Chunks may split a line anywhere, including inside a multi-byte UTF-8
//! sequence, so bytes are buffered until a newline arrives and only complete
//! lines are decoded.

use futures::StreamExt;
use futures::stream::BoxStream;

use crate::client::ByteStream;
use crate::error::Result;
use sidekick_protocol::{StreamEvent, StreamPayload};

/// Decoded events. Transport failures are yielded as `Err` and end the
/// sequence; otherwise the last item is always [`StreamEvent::End`].
pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Newline-gated line buffer.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Take the unterminated tail left when the transport closed.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&tail).into_owned())
    }

    /// Bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Decode one complete line.
///
/// Lines without the data prefix and events the client does not act on give
/// `None`. A prefixed line whose JSON does not parse is logged and skipped.
pub fn decode_line(line: &str) -> Option<StreamEvent> {
    match StreamPayload::from_line(line)? {
        Ok(payload) => payload.into_event(),
        Err(e) => {
            tracing::debug!(error = %e, line = %line, "Skipping malformed stream line");
            None
        }
    }
}

/// Decode a response body.
pub fn decode(mut body: ByteStream) -> EventStream {
    let events = async_stream::stream! {
        let mut lines = LineDecoder::new();

        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    for line in lines.push(&bytes) {
                        if let Some(event) = decode_line(&line) {
                            yield Ok(event);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Answer stream transport failed");
                    yield Err(e);
                    return;
                }
            }
        }

        if let Some(tail) = lines.finish()
            && let Some(event) = decode_line(&tail)
        {
            yield Ok(event);
        }
        yield Ok(StreamEvent::End);
    };
    events.boxed()
}
