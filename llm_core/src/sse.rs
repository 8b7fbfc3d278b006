/// Accumulates raw network chunks and hands back complete lines.
///
/// Chunk boundaries fall anywhere, including mid-line and mid-codepoint.
/// Bytes are kept raw until a line completes, so a codepoint split across
/// two chunks reassembles intact.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Drain every complete line, trimmed, skipping blanks. The unfinished
    /// tail stays buffered.
    pub(crate) fn take_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever sits after the last newline, for end-of-stream handling.
    pub(crate) fn residue(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}
