//! Crash-loop detection over a bounded history of loop start instants

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LoopHistory {
    stamps: VecDeque<Instant>,
    capacity: usize,
    window: Duration,
}

impl LoopHistory {
    pub fn new(capacity: usize, window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            stamps: VecDeque::with_capacity(capacity),
            capacity,
            window,
        }
    }

    /// Record an iteration starting now. See [`LoopHistory::record_at`].
    pub fn record(&mut self) -> bool {
        self.record_at(Instant::now())
    }

    /// Append `now` and report whether the last `capacity` iterations all
    /// started within `window`. Always false until the history is full.
    pub fn record_at(&mut self, now: Instant) -> bool {
        self.stamps.push_back(now);
        while self.stamps.len() > self.capacity {
            self.stamps.pop_front();
        }

        if self.stamps.len() < self.capacity {
            return false;
        }
        match (self.stamps.front(), self.stamps.back()) {
            (Some(oldest), Some(newest)) => newest.saturating_duration_since(*oldest) < self.window,
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(4);

    #[test]
    fn test_iterations_within_half_window_trip_on_capacity() {
        let mut history = LoopHistory::new(5, WINDOW);
        let base = Instant::now();
        // 5 stamps spanning W/2 in total
        let step = WINDOW / 2 / 4;
        let results: Vec<bool> = (0..5).map(|i| history.record_at(base + step * i)).collect();
        assert_eq!(results, vec![false, false, false, false, true]);
    }

    #[test]
    fn test_slow_iterations_never_trip() {
        let mut history = LoopHistory::new(5, WINDOW);
        let base = Instant::now();
        for i in 0..20 {
            assert!(!history.record_at(base + WINDOW * 2 * i));
        }
        assert_eq!(history.len(), 5);
    }

    #[test]
    fn test_span_equal_to_window_does_not_trip() {
        let mut history = LoopHistory::new(3, WINDOW);
        let base = Instant::now();
        history.record_at(base);
        history.record_at(base + WINDOW / 2);
        assert!(!history.record_at(base + WINDOW));
    }

    #[test]
    fn test_slow_iteration_ages_out_signal() {
        let mut history = LoopHistory::new(3, WINDOW);
        let base = Instant::now();
        let ms = Duration::from_millis(10);
        assert!(!history.record_at(base));
        assert!(!history.record_at(base + ms));
        assert!(history.record_at(base + ms * 2));
        let late = base + WINDOW * 3;
        assert!(!history.record_at(late));
        assert!(!history.record_at(late + ms));
        assert!(history.record_at(late + ms * 2));
    }

    #[test]
    fn test_new_history_starts_cold() {
        let mut history = LoopHistory::new(2, WINDOW);
        assert!(history.is_empty());
        let base = Instant::now();
        assert!(!history.record_at(base));
        assert!(history.record_at(base));
    }
}
