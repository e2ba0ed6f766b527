//! # Line Reframing
//!
//! The device emits one reading per newline-terminated line, but the port
//! hands us arbitrary chunks: a line can arrive split at any byte, and one
//! chunk can carry several lines. The decoder owns the unterminated tail
//! between reads so reframing is invariant under split points.

/// Frames longer than this without a terminator are line noise, not data.
/// A legitimate reading is well under 32 bytes.
pub const MAX_FRAME_LEN: usize = 256;

/// Stateful splitter from raw bytes to complete telemetry lines.
#[derive(Debug)]
pub struct LineDecoder {
    /// Bytes of the current frame still waiting for a terminator.
    tail: Vec<u8>,
    max_frame: usize,
    /// Inside an over-length frame; drop bytes until the next terminator
    /// so the frame's continuation cannot masquerade as a fresh line.
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_LEN)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            tail: Vec::new(),
            max_frame,
            discarding: false,
        }
    }

    /// Feed a chunk of freshly-read bytes.
    /// Returns every line this chunk completed, terminator stripped, in
    /// arrival order. Decoding is lossy: invalid byte sequences become
    /// replacement characters and are rejected by the parser downstream,
    /// never here.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if self.discarding {
                if byte == b'\n' {
                    self.discarding = false;
                }
                continue;
            }

            if byte == b'\n' {
                let mut raw = std::mem::take(&mut self.tail);
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                // Blank lines are idle noise, not frames.
                if !raw.is_empty() {
                    lines.push(String::from_utf8_lossy(&raw).into_owned());
                }
            } else {
                self.tail.push(byte);
                if self.tail.len() >= self.max_frame {
                    tracing::debug!(len = self.tail.len(), "discarding over-length frame");
                    self.tail.clear();
                    self.discarding = true;
                }
            }
        }

        lines
    }

    /// Drop everything buffered. Called after a device reset so a
    /// half-received frame is never glued to post-reset bytes.
    pub fn clear(&mut self) {
        self.tail.clear();
        self.discarding = false;
    }

    /// Bytes currently held waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.tail.len()
    }
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}
