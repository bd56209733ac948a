//! Line reassembly over the stdout chunk stream.

use drover_core::events::{Event, decode_line};

/// A complete line and what it decoded to.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLine {
    /// The line with surrounding whitespace trimmed.
    pub raw: String,
    pub event: Event,
}

/// Reassembles newline-terminated lines across chunk boundaries and decodes
/// each one.
///
/// Bytes are buffered rather than text so that a multi-byte character split
/// across two chunks is decoded intact.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed. Blank lines are
    /// skipped.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DecodedLine> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(decoded) = decode(&line) {
                lines.push(decoded);
            }
        }
        lines
    }

    /// Flush the trailing text that never got a newline.
    pub fn finish(&mut self) -> Option<DecodedLine> {
        let rest = std::mem::take(&mut self.buf);
        decode(&rest)
    }

    /// Bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn decode(bytes: &[u8]) -> Option<DecodedLine> {
    let text = String::from_utf8_lossy(bytes);
    let raw = text.trim();
    if raw.is_empty() {
        return None;
    }
    Some(DecodedLine {
        raw: raw.to_string(),
        event: decode_line(raw),
    })
}
