//! Log Buffer - bounded rolling log of worker output
//!
//! Rules:
//! - Holds at most `capacity` lines; a full buffer evicts the oldest line first
//! - Capacity 0 disables logging: nothing is retained, no updates are produced
//! - Every append yields a [`LogUpdate`] so consumers can render incrementally

use std::collections::VecDeque;

/// Line terminator used in the buffer text
pub const LINE_END: &str = "\n";

/// Notification produced by one append
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogUpdate {
    /// Full buffer text after the append
    pub text: String,
    /// The line just appended
    pub line: String,
    /// Characters removed from the front of the previous text (0 if nothing evicted)
    pub removed: usize,
}

/// Log notifications, in the order they were produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Appended(LogUpdate),
    Cleared,
}

/// Presentation hint derived from a worker log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Error,
    Warn,
    Info,
}

/// Classify a worker log line by its `[ERROR]` / `[WARN]` tag
pub fn severity(line: &str) -> LogSeverity {
    if line.contains("[ERROR]") {
        LogSeverity::Error
    } else if line.contains("[WARN]") {
        LogSeverity::Warn
    } else {
        LogSeverity::Info
    }
}

/// Bounded rolling log
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    lines: VecDeque<String>,
    text: String,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: VecDeque::new(),
            text: String::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_disabled(&self) -> bool {
        self.capacity == 0
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    /// Append one line, evicting the oldest when full
    pub fn push(&mut self, line: &str) -> Option<LogUpdate> {
        if self.is_disabled() {
            return None;
        }

        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let mut removed = 0;

        if self.lines.len() >= self.capacity {
            removed = self.evict_front();
        }

        self.text.push_str(line);
        self.text.push_str(LINE_END);
        self.lines.push_back(line.to_string());

        Some(LogUpdate {
            text: self.text.clone(),
            line: line.to_string(),
            removed,
        })
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.text.clear();
    }

    /// Change capacity, dropping the oldest lines that no longer fit
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        if capacity == 0 {
            self.clear();
            return;
        }
        while self.lines.len() > capacity {
            self.evict_front();
        }
    }

    /// Drop the oldest line, returning how many characters left the text
    fn evict_front(&mut self) -> usize {
        match self.lines.pop_front() {
            Some(oldest) => {
                self.text.drain(..oldest.len() + LINE_END.len());
                oldest.chars().count() + LINE_END.chars().count()
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut log = LogBuffer::new(3);
        let update = log.push("first").unwrap();

        assert_eq!(update.text, "first\n");
        assert_eq!(update.line, "first");
        assert_eq!(update.removed, 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_eviction_reports_removed_prefix() {
        let mut log = LogBuffer::new(2);
        log.push("alpha");
        log.push("be");
        let update = log.push("gamma").unwrap();

        assert_eq!(update.removed, "alpha\n".len());
        assert_eq!(update.text, "be\ngamma\n");
        assert_eq!(log.lines().collect::<Vec<_>>(), vec!["be", "gamma"]);
    }

    #[test]
    fn test_removed_offset_matches_previous_text() {
        let mut log = LogBuffer::new(1);
        let before = log.push("héllo wörld").unwrap().text;
        let update = log.push("next").unwrap();

        // Counted in characters, not bytes
        assert_eq!(update.removed, 12);
        assert_eq!(before.chars().skip(update.removed).count(), 0);
        assert_eq!(update.text, "next\n");
    }

    #[test]
    fn test_zero_capacity_disables_logging() {
        let mut log = LogBuffer::new(0);
        for i in 0..10 {
            assert!(log.push(&format!("line {}", i)).is_none());
        }
        assert!(log.is_empty());
        assert_eq!(log.text(), "");
    }

    #[test]
    fn test_trailing_carriage_return_is_stripped() {
        let mut log = LogBuffer::new(5);
        let update = log.push("windows line\r\n").unwrap();
        assert_eq!(update.line, "windows line");
        assert_eq!(log.text(), "windows line\n");
    }

    #[test]
    fn test_shrinking_capacity_keeps_newest() {
        let mut log = LogBuffer::new(5);
        for line in ["a", "b", "c", "d"] {
            log.push(line);
        }
        log.set_capacity(2);
        assert_eq!(log.text(), "c\nd\n");

        log.set_capacity(0);
        assert!(log.is_empty());
        assert!(log.push("e").is_none());
    }

    #[test]
    fn test_severity() {
        assert_eq!(severity("12:00 [ERROR] device lost"), LogSeverity::Error);
        assert_eq!(severity("12:00 [WARN] high temperature"), LogSeverity::Warn);
        assert_eq!(severity("12:00 [INFO] share accepted"), LogSeverity::Info);
    }
}
