//! Accumulates serial bytes and hands them back one line at a time.

/// Pending bytes allowed without a newline before the buffer is dropped.
pub const MAX_PENDING_BYTES: usize = 4096;

/// Bytes read from serial that have not yet formed a complete line.
///
/// Kept as raw bytes so a UTF-8 sequence split across two reads is decoded
/// whole once its line completes.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        if self.pending.len() > MAX_PENDING_BYTES && !self.pending.contains(&b'\n') {
            tracing::warn!(
                "Discarding {} buffered bytes with no line terminator",
                self.pending.len()
            );
            self.pending.clear();
        }
    }

    /// Remove and return the next complete line, without its terminator.
    ///
    /// Invalid UTF-8 is dropped rather than replaced.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(decode_lossy(&line[..end]))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

fn decode_lossy(bytes: &[u8]) -> String {
    bytes.utf8_chunks().map(|chunk| chunk.valid()).collect()
}
