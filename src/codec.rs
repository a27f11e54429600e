//! Newline-delimited JSON framing.
//!
//! Outbound messages are serialized to exactly one line each. Inbound bytes
//! are buffered until a `\n` arrives, so messages split across arbitrary read
//! boundaries (including mid-way through a UTF-8 sequence) decode the same as
//! if they had arrived in one read.

use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::diagnostics::{Diagnostic, DiagnosticSink, SharedSink};
use super::errors::ClientError;
use super::types::{JsonRpcNotification, JsonRpcRequest};

/// Read size for the stdout pump.
const READ_CHUNK_SIZE: usize = 8 * 1024;

// ─── Encoding ────────────────────────────────────────────────────────────────

/// Encode a request as a single newline-terminated line.
pub fn encode_request(request: &JsonRpcRequest) -> Result<String, ClientError> {
    encode_line(request)
}

/// Encode a notification as a single newline-terminated line.
pub fn encode_notification(notification: &JsonRpcNotification) -> Result<String, ClientError> {
    encode_line(notification)
}

fn encode_line<T: Serialize>(message: &T) -> Result<String, ClientError> {
    // serde_json escapes control characters inside strings, and the compact
    // writer emits no whitespace, so the only newline is the one we append.
    let mut line = serde_json::to_string(message).map_err(|e| ClientError::Protocol {
        reason: format!("failed to serialize message: {e}"),
    })?;
    line.push('\n');
    Ok(line)
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// Incremental line decoder holding the residual partial line.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received after the last newline.
    pub fn residual(&self) -> &[u8] {
        &self.buffer
    }

    /// Append `chunk` and return every complete message now available.
    ///
    /// Lines that are not valid JSON are reported to `sink` and skipped.
    /// Blank lines are skipped silently.
    pub fn decode(&mut self, chunk: &[u8], sink: &dyn DiagnosticSink) -> Vec<Value> {
        // Only the new bytes can contain a newline we haven't seen yet.
        let mut scan = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[scan..].iter().position(|&b| b == b'\n') {
            let end = scan + offset;
            if let Some(message) = parse_line(&self.buffer[start..end], sink) {
                messages.push(message);
            }
            start = end + 1;
            scan = start;
        }
        self.buffer.drain(..start);
        messages
    }

    /// Flush the residual buffer at end of stream, treating it as a final line.
    pub fn finish(&mut self, sink: &dyn DiagnosticSink) -> Vec<Value> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest, sink).into_iter().collect()
    }
}

/// Parse one line (without its `\n`). `None` for blank or malformed lines.
fn parse_line(line: &[u8], sink: &dyn DiagnosticSink) -> Option<Value> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<Value>(line) {
        Ok(value) => Some(value),
        Err(e) => {
            sink.report(Diagnostic::MalformedLine {
                line: String::from_utf8_lossy(line).into_owned(),
                reason: e.to_string(),
            });
            None
        }
    }
}

/// State carried between polls of [`decode_stream`].
struct DecodeState<R> {
    reader: R,
    decoder: LineDecoder,
    ready: std::collections::VecDeque<Value>,
    buf: Vec<u8>,
    done: bool,
    sink: SharedSink,
}

/// Turn an async byte reader into a lazy stream of decoded JSON values.
///
/// The stream ends when the reader reaches EOF or fails; a final unterminated
/// line is decoded before ending.
pub fn decode_stream<R>(reader: R, sink: SharedSink) -> impl Stream<Item = Value>
where
    R: AsyncRead + Unpin,
{
    let state = DecodeState {
        reader,
        decoder: LineDecoder::new(),
        ready: std::collections::VecDeque::new(),
        buf: vec![0u8; READ_CHUNK_SIZE],
        done: false,
        sink,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(message) = state.ready.pop_front() {
                return Some((message, state));
            }
            if state.done {
                return None;
            }

            match state.reader.read(&mut state.buf).await {
                Ok(0) => {
                    let tail = state.decoder.finish(state.sink.as_ref());
                    state.ready.extend(tail);
                    state.done = true;
                }
                Ok(n) => {
                    let messages = state.decoder.decode(&state.buf[..n], state.sink.as_ref());
                    state.ready.extend(messages);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "read error on server stdout");
                    let tail = state.decoder.finish(state.sink.as_ref());
                    state.ready.extend(tail);
                    state.done = true;
                }
            }
        }
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
