//! Bounded record of failed attempts.

use bulwark_core::FailureType;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Hard cap on retained attempts.
pub const HISTORY_CAPACITY: usize = 100;

/// Attempts kept after the cap is exceeded.
pub const HISTORY_RETAIN: usize = 50;

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub failure_type: FailureType,
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
}

/// Failed-attempt history shared by concurrent callers.
///
/// Exceeding the capacity compacts the buffer to the most recent
/// `retain` entries, so memory stays bounded while recent failures remain
/// observable. A running total is kept separately.
#[derive(Debug)]
pub struct RetryHistory {
    inner: Mutex<HistoryInner>,
    capacity: usize,
    retain: usize,
}

#[derive(Debug, Default)]
struct HistoryInner {
    attempts: VecDeque<RetryAttempt>,
    total_recorded: u64,
}

impl RetryHistory {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY, HISTORY_RETAIN)
    }

    /// `retain` is clamped to `capacity`.
    pub fn with_capacity(capacity: usize, retain: usize) -> Self {
        Self {
            inner: Mutex::new(HistoryInner::default()),
            capacity,
            retain: retain.min(capacity),
        }
    }

    pub fn record(&self, attempt: RetryAttempt) {
        let mut inner = self.inner.lock();
        inner.attempts.push_back(attempt);
        inner.total_recorded += 1;

        if inner.attempts.len() > self.capacity {
            let excess = inner.attempts.len() - self.retain;
            inner.attempts.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attempts ever recorded, including compacted ones.
    pub fn total_recorded(&self) -> u64 {
        self.inner.lock().total_recorded
    }

    /// Copy of the retained attempts, oldest first.
    pub fn snapshot(&self) -> Vec<RetryAttempt> {
        self.inner.lock().attempts.iter().cloned().collect()
    }

    /// Retained attempts newer than `window`.
    pub fn recent(&self, window: ChronoDuration) -> usize {
        let cutoff = Utc::now() - window;
        self.inner
            .lock()
            .attempts
            .iter()
            .filter(|a| a.timestamp >= cutoff)
            .count()
    }

    /// Retained attempts per failure type.
    pub fn breakdown(&self) -> BTreeMap<FailureType, usize> {
        let mut counts = BTreeMap::new();
        for attempt in self.inner.lock().attempts.iter() {
            *counts.entry(attempt.failure_type).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&self) {
        *self.inner.lock() = HistoryInner::default();
    }
}

impl Default for RetryHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(n: u32, failure_type: FailureType) -> RetryAttempt {
        RetryAttempt {
            attempt_number: n,
            failure_type,
            error_message: format!("failure {n}"),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_never_exceeds_capacity_and_compacts() {
        let history = RetryHistory::new();
        for n in 0..HISTORY_CAPACITY as u32 {
            history.record(attempt(n, FailureType::ApiError));
            assert!(history.len() <= HISTORY_CAPACITY);
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);

        history.record(attempt(100, FailureType::ApiError));
        assert_eq!(history.len(), HISTORY_RETAIN);
        assert_eq!(history.total_recorded(), 101);

        // Most recent entries survive
        let snapshot = history.snapshot();
        assert_eq!(snapshot.last().unwrap().attempt_number, 100);
        assert_eq!(snapshot.first().unwrap().attempt_number, 51);
    }

    #[test]
    fn test_breakdown_and_recent() {
        let history = RetryHistory::new();
        history.record(attempt(1, FailureType::Timeout));
        history.record(attempt(2, FailureType::Timeout));
        history.record(attempt(3, FailureType::RateLimit));

        let mut old = attempt(4, FailureType::NetworkError);
        old.timestamp = Utc::now() - ChronoDuration::minutes(10);
        history.record(old);

        let breakdown = history.breakdown();
        assert_eq!(breakdown.get(&FailureType::Timeout), Some(&2));
        assert_eq!(breakdown.get(&FailureType::RateLimit), Some(&1));
        assert_eq!(history.recent(ChronoDuration::minutes(5)), 3);

        history.clear();
        assert!(history.is_empty());
    }
}
