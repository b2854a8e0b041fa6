use std::collections::VecDeque;

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Most recent explosion multipliers, newest first.
///
/// At capacity the oldest entry is evicted before the new one is pushed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryRing {
    capacity: usize,
    entries: VecDeque<String>,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, multiplier: impl Into<String>) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(multiplier.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut ring = HistoryRing::default();
        ring.push("1.10x");
        ring.push("2.50x");
        assert_eq!(ring.entries(), vec!["2.50x", "1.10x"]);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut ring = HistoryRing::default();
        for i in 0..45 {
            ring.push(format!("{i}"));
            assert!(ring.len() <= DEFAULT_HISTORY_CAPACITY);
        }
        let entries = ring.entries();
        assert_eq!(entries.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(entries.first().map(String::as_str), Some("44"));
        // Oldest surviving entry is 45 - 20 = 25.
        assert_eq!(entries.last().map(String::as_str), Some("25"));
    }

    #[test]
    fn test_zero_capacity_keeps_latest() {
        let mut ring = HistoryRing::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.entries(), vec!["b"]);
    }
}
