/// Placeholder rendered when no warning or error line was seen.
pub const NO_IMPORTANT_LOGS: &str = "-- no error / warning logs --";

/// Fixed-capacity ring holding the most recent important log lines.
///
/// Slots are overwritten in place once the ring is full; `count` keeps the
/// total number of lines ever appended so the render order can be rebuilt.
#[derive(Debug, Clone)]
pub struct ImportantLogBuffer {
    lines: Vec<String>,
    capacity: usize,
    count: usize,
}

impl ImportantLogBuffer {
    /// A capacity of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Vec::with_capacity(capacity),
            capacity,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total number of lines appended, including overwritten ones.
    pub fn total_seen(&self) -> usize {
        self.count
    }

    /// Next slot to be written.
    fn cursor(&self) -> usize {
        self.count % self.capacity
    }

    pub fn append(&mut self, line: impl Into<String>) {
        let line = line.into();
        let idx = self.cursor();
        if idx < self.lines.len() {
            self.lines[idx] = line;
        } else {
            self.lines.push(line);
        }
        self.count += 1;
    }

    /// Lines oldest first, or the placeholder when nothing was appended.
    pub fn render(&self) -> Vec<String> {
        match self.count {
            0 => vec![NO_IMPORTANT_LOGS.to_string()],
            n if n <= self.capacity => self.lines[..n].to_vec(),
            _ if self.cursor() == 0 => self.lines.clone(),
            _ => {
                // slots before the cursor are newer than the ones after it
                let idx = self.cursor();
                let mut out = Vec::with_capacity(self.capacity);
                out.extend_from_slice(&self.lines[idx..]);
                out.extend_from_slice(&self.lines[..idx]);
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, lines: &[&str]) -> ImportantLogBuffer {
        let mut buf = ImportantLogBuffer::new(capacity);
        for line in lines {
            buf.append(*line);
        }
        buf
    }

    #[test]
    fn test_empty_renders_placeholder() {
        let buf = ImportantLogBuffer::new(5);
        assert_eq!(buf.render(), vec![NO_IMPORTANT_LOGS.to_string()]);
    }

    #[test]
    fn test_under_capacity_keeps_order_without_padding() {
        let buf = filled(5, &["a", "b"]);
        assert_eq!(buf.render(), vec!["a", "b"]);
    }

    #[test]
    fn test_exactly_full() {
        let buf = filled(3, &["a", "b", "c"]);
        assert_eq!(buf.render(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_wrapped_mid_cycle() {
        let buf = filled(3, &["a", "b", "c", "d", "e"]);
        assert_eq!(buf.render(), vec!["c", "d", "e"]);
    }

    #[test]
    fn test_wrapped_full_cycle() {
        let buf = filled(3, &["a", "b", "c", "d", "e", "f"]);
        assert_eq!(buf.render(), vec!["d", "e", "f"]);
    }

    #[test]
    fn test_never_holds_more_than_capacity() {
        let mut buf = ImportantLogBuffer::new(4);
        for i in 0..100 {
            buf.append(format!("line {i}"));
            assert!(buf.render().len() <= 4);
        }
        assert_eq!(buf.total_seen(), 100);
        assert_eq!(
            buf.render(),
            vec!["line 96", "line 97", "line 98", "line 99"]
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buf = filled(0, &["a", "b"]);
        assert_eq!(buf.capacity(), 1);
        assert_eq!(buf.render(), vec!["b"]);
    }
}
