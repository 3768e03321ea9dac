//! Rolling count of executed trades over simulated time
//!
//! Trades are tallied into fixed-width buckets keyed by simulated time, so
//! the count over a window is independent of how many trades are retained
//! for display.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct TradeWindow {
    bucket_ms: u64,
    span_ms: u64,
    /// (bucket start, trades), oldest first
    buckets: VecDeque<(u64, u64)>,
}

impl TradeWindow {
    pub fn new(bucket_ms: u64, span_ms: u64) -> Self {
        Self {
            bucket_ms: bucket_ms.max(1),
            span_ms,
            buckets: VecDeque::new(),
        }
    }

    fn bucket_of(&self, ts: u64) -> u64 {
        ts - ts % self.bucket_ms
    }

    /// Count `n` trades stamped at `ts`
    pub fn record(&mut self, ts: u64, n: u64) {
        let start = self.bucket_of(ts);
        match self.buckets.back_mut() {
            Some((last, count)) if *last == start => *count += n,
            // Out-of-order stamps land in the newest bucket
            Some((last, count)) if *last > start => *count += n,
            _ => self.buckets.push_back((start, n)),
        }

        let horizon = start.saturating_sub(self.span_ms + self.bucket_ms);
        while matches!(self.buckets.front(), Some((s, _)) if *s < horizon) {
            self.buckets.pop_front();
        }
    }

    /// Trades whose bucket overlaps `[now - window_ms, now]`
    pub fn count_within(&self, now: u64, window_ms: u64) -> u64 {
        let since = self.bucket_of(now.saturating_sub(window_ms));
        self.buckets
            .iter()
            .rev()
            .take_while(|(s, _)| *s >= since)
            .filter(|(s, _)| *s <= now)
            .map(|(_, c)| c)
            .sum()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_beyond_any_retention_limit() {
        let mut w = TradeWindow::new(1_000, 300_000);
        for i in 0..60_000u64 {
            w.record(i * 5, 1);
        }
        assert_eq!(w.count_within(299_995, 300_000), 60_000);
    }

    #[test]
    fn test_old_buckets_fall_out() {
        let mut w = TradeWindow::new(1_000, 10_000);
        w.record(0, 50);
        w.record(5_500, 7);
        assert_eq!(w.count_within(6_000, 10_000), 57);
        assert_eq!(w.count_within(15_000, 10_000), 7);

        w.record(30_000, 3);
        assert_eq!(w.count_within(30_000, 10_000), 3);
        assert_eq!(w.bucket_count(), 1);
    }

    #[test]
    fn test_batch_record_and_clear() {
        let mut w = TradeWindow::new(1_000, 60_000);
        w.record(2_100, 400);
        w.record(2_900, 600);
        assert_eq!(w.bucket_count(), 1);
        assert_eq!(w.count_within(3_000, 60_000), 1_000);

        w.clear();
        assert_eq!(w.count_within(3_000, 60_000), 0);
    }
}
