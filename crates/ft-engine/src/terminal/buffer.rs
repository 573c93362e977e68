//! Timestamped scrollback buffer
//!
//! Lines are append-only and carry strictly increasing timestamps, so a
//! client that passes the previous poll's cursor as `since` sees every line
//! exactly once.

use std::collections::VecDeque;

use ft_core::api::OutputLine;
use ft_core::time::next_monotonic_millis;
use ft_core::types::StreamKind;

/// Bounded buffer of output lines for one terminal session
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<OutputLine>,
    capacity: usize,
    /// Timestamp of the newest line ever pushed
    high_water: u64,
}

impl OutputBuffer {
    /// Create a buffer keeping at most `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity: capacity.max(1),
            high_water: 0,
        }
    }

    /// Append text, one entry per line; returns the number of lines added
    pub fn push(&mut self, stream: StreamKind, text: &str) -> usize {
        let mut added = 0;
        for line in text.split_inclusive('\n') {
            let timestamp = next_monotonic_millis(self.high_water);
            self.high_water = timestamp;
            self.lines.push_back(OutputLine {
                timestamp,
                stream,
                text: line.to_string(),
            });
            added += 1;
        }
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
        added
    }

    /// Lines strictly newer than `since`, oldest first
    pub fn since(&self, since: u64) -> Vec<OutputLine> {
        // Timestamps are sorted; skip the prefix that is not newer
        let start = self.lines.partition_point(|line| line.timestamp <= since);
        self.lines.range(start..).cloned().collect()
    }

    /// Cursor covering everything pushed so far
    pub fn high_water(&self) -> u64 {
        self.high_water
    }

    /// Number of buffered lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_splits_lines() {
        let mut buf = OutputBuffer::new(10);
        assert_eq!(buf.push(StreamKind::Stdout, "a\nb\nc"), 3);
        let lines = buf.since(0);
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["a\n", "b\n", "c"]);
        assert!(lines.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_empty_text_adds_nothing() {
        let mut buf = OutputBuffer::new(10);
        assert_eq!(buf.push(StreamKind::Stderr, ""), 0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_scrollback_drops_oldest() {
        let mut buf = OutputBuffer::new(2);
        buf.push(StreamKind::Stdout, "1\n2\n3\n");
        let texts: Vec<String> = buf.since(0).into_iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["2\n", "3\n"]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_cursor_polling_has_no_gaps_or_duplicates() {
        let mut buf = OutputBuffer::new(100);
        let mut seen = Vec::new();
        let mut cursor = 0;

        for round in 0..5 {
            buf.push(StreamKind::Stdout, &format!("line {}\n", round));
            let new_lines = buf.since(cursor);
            cursor = buf.high_water();
            seen.extend(new_lines.into_iter().map(|l| l.text));
        }
        let new_lines = buf.since(cursor);
        assert!(new_lines.is_empty());

        let expected: Vec<String> = (0..5).map(|r| format!("line {}\n", r)).collect();
        assert_eq!(seen, expected);
    }
}
