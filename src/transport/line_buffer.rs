/// Splits a byte stream into newline-terminated lines. A partial line that
/// grows past `max_line_bytes` is dropped up to its terminating newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line_bytes: Option<usize>,
    discarding: bool,
    overflowed_bytes: usize,
}

impl LineBuffer {
    pub fn new(max_line_bytes: Option<usize>) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            discarding: false,
            overflowed_bytes: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(idx) = rest.iter().position(|byte| *byte == b'\n') {
            let (head, tail) = rest.split_at(idx);
            rest = &tail[1..];
            if self.discarding {
                self.overflowed_bytes = self.overflowed_bytes.saturating_add(head.len() + 1);
                self.discarding = false;
                continue;
            }
            self.pending.extend_from_slice(head);
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }

        if self.discarding {
            self.overflowed_bytes = self.overflowed_bytes.saturating_add(rest.len());
        } else {
            self.pending.extend_from_slice(rest);
            if let Some(max) = self.max_line_bytes {
                if self.pending.len() > max {
                    self.overflowed_bytes = self.overflowed_bytes.saturating_add(self.pending.len());
                    self.pending.clear();
                    self.discarding = true;
                }
            }
        }

        lines
    }

    pub fn consume_overflowed_bytes(&mut self) -> usize {
        std::mem::take(&mut self.overflowed_bytes)
    }

    /// Remaining unterminated data, e.g. at end of stream.
    pub fn flush(&mut self) -> Option<String> {
        let pending = std::mem::take(&mut self.pending);
        self.discarding = false;
        (!pending.is_empty()).then(|| String::from_utf8_lossy(&pending).into_owned())
    }
}
