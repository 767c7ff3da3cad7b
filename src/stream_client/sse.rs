//! Server-Sent Events framing
//!
//! Incremental decoder: bytes in, complete `data` payloads out. Chunk
//! boundaries may fall anywhere, including inside a UTF-8 sequence.

use super::transport::TransportError;

/// Upper bound for one line and for one assembled message
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// SSE frame decoder
#[derive(Debug)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
    data_len: usize,
    max_frame: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            pending: Vec::new(),
            data: Vec::new(),
            data_len: 0,
            max_frame: max_frame.max(1),
        }
    }

    /// Feed a chunk; returns every message completed by it
    ///
    /// A line or message larger than the frame limit is an error; the
    /// connection is not usable afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, TransportError> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(message) = self.process_line(&line) {
                messages.push(message);
            }
            if self.data_len > self.max_frame {
                return Err(TransportError::FrameTooLarge(self.max_frame));
            }
        }
        if self.pending.len() > self.max_frame {
            return Err(TransportError::FrameTooLarge(self.max_frame));
        }
        Ok(messages)
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let message = self.data.join("\n");
            self.data.clear();
            self.data_len = 0;
            return Some(message);
        }

        // comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        if field == "data" {
            self.data_len += value.len() + 1;
            self.data.push(value.to_string());
        }
        // event / id / retry are not used: the payload carries its own type
        None
    }
}
