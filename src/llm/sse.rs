//! Incremental decoder for `text/event-stream` bodies
//!
//! Bytes arrive in arbitrary pieces; only complete lines are interpreted, so
//! multi-byte characters and `data:` lines split across reads are handled.

use super::error::LlmError;

/// Longest partial line buffered while waiting for a newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// A decoded event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    /// JSON payload of a `data:` line
    Data(String),
    /// The `data: [DONE]` sentinel
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every frame completed by them.
    ///
    /// Fails once the unterminated remainder exceeds `MAX_LINE_BYTES`.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseFrame>, LlmError> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(frame) = parse_line(&line) {
                frames.push(frame);
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            let pending = self.buffer.len();
            self.buffer.clear();
            return Err(LlmError::stream(format!(
                "stream line exceeds {MAX_LINE_BYTES} bytes ({pending} buffered)"
            )));
        }
        Ok(frames)
    }

    /// Flush a final line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        parse_line(&line)
    }
}

fn parse_line(raw: &[u8]) -> Option<SseFrame> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\n', '\r']);

    // Comments, other fields (event:, id:, retry:) and blank separators
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload.is_empty() {
        return None;
    }
    if payload.trim_end() == "[DONE]" {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(payload.to_string()))
}
