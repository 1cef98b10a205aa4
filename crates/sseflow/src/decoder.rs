//! Incremental UTF-8 decoding of boundary-unaligned byte chunks.
//!
//! Transports hand over body bytes wherever the network happened to split
//! them, which is frequently in the middle of a multi-byte codepoint. The
//! decoder emits every complete scalar immediately and carries the few bytes
//! of a split sequence over to the next chunk.
//!
//! Malformed input is skipped rather than replaced or rejected: each maximal
//! invalid subsequence is dropped and decoding resumes at the next byte that
//! can start a codepoint.

use tracing::trace;

/// Longest prefix of a valid sequence that can still be waiting for bytes.
const MAX_CARRY: usize = 3;

/// Stateful UTF-8 decoder for a single byte stream.
///
/// Decoding a stream chunk by chunk yields exactly the same text as decoding
/// it in one piece, wherever the chunk boundaries fall.
#[derive(Debug, Default, Clone)]
pub struct Utf8StreamDecoder {
    carry: Vec<u8>,
}

impl Utf8StreamDecoder {
    /// Creates a decoder with nothing pending.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the next chunk, returning all text that is complete so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        if self.carry.is_empty() {
            return self.decode_bytes(chunk);
        }

        let mut joined = std::mem::take(&mut self.carry);
        joined.extend_from_slice(chunk);
        self.decode_bytes(&joined)
    }

    /// Ends the stream, dropping any incomplete trailing sequence.
    ///
    /// Returns the number of bytes that were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.carry.len();
        if dropped > 0 {
            trace!(dropped, "Dropping incomplete UTF-8 sequence at end of stream");
        }
        self.carry.clear();
        dropped
    }

    /// Discards pending bytes without logging.
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    /// Number of bytes held back waiting for the rest of a codepoint.
    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }

    fn decode_bytes(&mut self, mut input: &[u8]) -> String {
        let mut text = String::with_capacity(input.len());

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    text.push_str(valid);
                    return text;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    // `valid_up_to` marks a prefix that is guaranteed valid
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        text.push_str(valid);
                    }

                    match e.error_len() {
                        Some(invalid) => {
                            trace!(skipped = invalid, "Skipping malformed UTF-8 bytes");
                            input = &rest[invalid..];
                        }
                        None => {
                            // Truncated sequence at the end: wait for more bytes
                            debug_assert!(rest.len() <= MAX_CARRY);
                            self.carry.extend_from_slice(rest);
                            return text;
                        }
                    }
                }
            }
        }
    }
}
