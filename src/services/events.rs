use std::collections::VecDeque;

/// Append-only progress log, iterated newest first.
///
/// Entries are never dropped, so the log grows for as long as the owning
/// controller lives. Long-running hosts that reuse one controller for many
/// runs should expect unbounded growth here.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    entries: VecDeque<String>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.entries.push_front(message);
    }

    /// Same as `push`, but mirrored to the logger as a warning.
    pub fn push_failure(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        self.entries.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.front().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    /// Chronological order, for writing the log out.
    pub fn oldest_first(&self) -> Vec<String> {
        self.entries.iter().rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_entry_first() {
        let mut log = EventLog::new();
        for i in 0..5 {
            log.push(format!("step {}", i));
        }

        assert_eq!(log.len(), 5);
        assert_eq!(log.latest(), Some("step 4"));
        let entries: Vec<&str> = log.iter().collect();
        assert_eq!(entries, vec!["step 4", "step 3", "step 2", "step 1", "step 0"]);
    }

    #[test]
    fn test_failures_share_the_same_ordering() {
        let mut log = EventLog::new();
        log.push("a");
        log.push_failure("b failed");
        log.push("c");

        assert_eq!(log.to_vec(), vec!["c", "b failed", "a"]);
        assert_eq!(log.oldest_first(), vec!["a", "b failed", "c"]);
    }

    #[test]
    fn test_duplicate_messages_are_kept() {
        let mut log = EventLog::new();
        log.push("same");
        log.push("same");
        assert_eq!(log.len(), 2);
    }
}
