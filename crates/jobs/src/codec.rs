//! Line-oriented frame decoder for the analysis push stream.
//!
//! The stream body is a sequence of `\n`-terminated lines. Only lines
//! that start with `data: ` (after trimming) are protocol records; their
//! payload is a JSON [`StreamMessage`]. Everything else (comments,
//! keep-alives, `event:` lines) is transport noise and ignored.
//!
//! Reads may split a record anywhere, including inside a multi-byte
//! UTF-8 sequence, so the decoder buffers raw bytes and only decodes a
//! line once its terminating newline has arrived. A record that fails
//! to parse is logged and skipped; it never aborts the stream.

use fairvalue_core::job_events::FRAME_PREFIX;

use crate::messages::{parse_message, StreamMessage};

/// Incremental decoder; one per stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Set by [`finish`](Self::finish): the unterminated tail counts as a line.
    eof: bool,
    skipped: usize,
}

/// Lazy iterator over the messages decodable from the decoder's buffer.
///
/// Consumes complete lines as it goes; anything not yet consumed stays
/// buffered for the next [`feed`](FrameDecoder::feed).
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate the records it completed.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) -> Frames<'_> {
        self.buffer.extend_from_slice(chunk.as_ref());
        Frames { decoder: self }
    }

    /// Signal end-of-stream and iterate whatever the buffer still holds.
    ///
    /// A terminal record may arrive without a trailing newline, so the
    /// remaining bytes go through the same line logic once more.
    pub fn finish(&mut self) -> Frames<'_> {
        self.eof = true;
        Frames { decoder: self }
    }

    /// Bytes buffered but not yet part of a complete line.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Number of `data:` records dropped because they did not parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn next_line(&mut self) -> Option<String> {
        match self.buffer.iter().position(|&b| b == b'\n') {
            Some(idx) => {
                let line: Vec<u8> = self.buffer.drain(..=idx).collect();
                Some(String::from_utf8_lossy(&line[..idx]).into_owned())
            }
            None if self.eof && !self.buffer.is_empty() => {
                let line = std::mem::take(&mut self.buffer);
                Some(String::from_utf8_lossy(&line).into_owned())
            }
            None => None,
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = StreamMessage;

    fn next(&mut self) -> Option<StreamMessage> {
        loop {
            let line = self.decoder.next_line()?;
            let Some(payload) = frame_payload(&line) else {
                continue;
            };
            match parse_message(payload) {
                Ok(message) => return Some(message),
                Err(e) => {
                    self.decoder.skipped += 1;
                    tracing::warn!(
                        error = %e,
                        raw_frame = %payload,
                        "Skipping unparsable stream frame",
                    );
                }
            }
        }
    }
}

/// Extract the payload of a protocol record, or `None` for noise lines.
pub fn frame_payload(line: &str) -> Option<&str> {
    let payload = line.trim().strip_prefix(FRAME_PREFIX)?.trim();
    (!payload.is_empty()).then_some(payload)
}
