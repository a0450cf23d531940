//! Bucketed rolling window of call outcomes.

use super::guard::Outcome;
use std::time::{Duration, Instant};

const EMPTY: u64 = u64::MAX;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    seq: u64,
    successes: u64,
    failures: u64,
}

impl Bucket {
    const fn empty() -> Self {
        Self {
            seq: EMPTY,
            successes: 0,
            failures: 0,
        }
    }
}

/// Totals over the live part of a [`RollingWindow`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowCounts {
    pub total: u64,
    pub failures: u64,
}

impl WindowCounts {
    /// Failure share in percent, 0 when the window is empty.
    pub fn error_percent(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.failures * 100 / self.total
        }
    }
}

/// Outcome counters covering the last `window` of wall time.
///
/// The window is split into fixed buckets; a bucket is recycled once it falls
/// out of the window, so old samples expire without a background task.
#[derive(Debug)]
pub struct RollingWindow {
    buckets: Vec<Bucket>,
    bucket_len: Duration,
    origin: Instant,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: usize) -> Self {
        Self::starting_at(window, buckets, Instant::now())
    }

    pub(crate) fn starting_at(window: Duration, buckets: usize, origin: Instant) -> Self {
        let buckets = buckets.max(1);
        let bucket_len = (window / buckets as u32).max(Duration::from_millis(1));
        Self {
            buckets: vec![Bucket::empty(); buckets],
            bucket_len,
            origin,
        }
    }

    fn seq(&self, now: Instant) -> u64 {
        (now.saturating_duration_since(self.origin).as_nanos() / self.bucket_len.as_nanos()) as u64
    }

    pub fn record(&mut self, now: Instant, outcome: Outcome) {
        let seq = self.seq(now);
        let len = self.buckets.len() as u64;
        let bucket = &mut self.buckets[(seq % len) as usize];
        if bucket.seq != seq {
            *bucket = Bucket {
                seq,
                ..Bucket::empty()
            };
        }
        match outcome {
            Outcome::Success => bucket.successes += 1,
            Outcome::Failure => bucket.failures += 1,
        }
    }

    pub fn counts(&self, now: Instant) -> WindowCounts {
        let current = self.seq(now);
        let len = self.buckets.len() as u64;
        self.buckets
            .iter()
            .filter(|b| b.seq != EMPTY && b.seq <= current && b.seq + len > current)
            .fold(WindowCounts::default(), |acc, b| WindowCounts {
                total: acc.total + b.successes + b.failures,
                failures: acc.failures + b.failures,
            })
    }

    pub fn reset(&mut self, now: Instant) {
        self.origin = now;
        for bucket in &mut self.buckets {
            *bucket = Bucket::empty();
        }
    }
}
