use std::collections::VecDeque;

use parking_lot::Mutex;

// ─── Configuration ───────────────────────────────────────────────

/// How many records a ledger keeps before evicting the oldest.
pub const DEFAULT_CAPACITY: usize = 10_000;

// ─── Public types ────────────────────────────────────────────────

/// Anything that can live in an [`EventLedger`].
pub trait Timestamped {
    /// Epoch milliseconds at which the record was observed.
    fn timestamp_ms(&self) -> i64;
}

/// A trailing time span `(start_ms, end_ms]` used to filter a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl Window {
    /// The `period_ms` milliseconds leading up to `now_ms`.
    pub fn trailing(period_ms: i64, now_ms: i64) -> Self {
        Self {
            start_ms: now_ms.saturating_sub(period_ms.max(0)),
            end_ms: now_ms,
        }
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms > self.start_ms
    }

    /// Boundary between the older and the newer half of the window.
    pub fn midpoint(&self) -> i64 {
        self.start_ms + (self.end_ms - self.start_ms) / 2
    }

    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

/// Bounded, append-only, thread-safe record buffer.
///
/// New records go to the tail; once `capacity` is exceeded the oldest
/// records are dropped from the head. Append and trim happen under one lock,
/// so readers never observe a buffer above capacity.
pub struct EventLedger<R> {
    inner: Mutex<VecDeque<R>>,
    capacity: usize,
}

// ─── EventLedger impl ────────────────────────────────────────────

impl<R: Timestamped + Clone> EventLedger<R> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024) + 1)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record and trim the head back down to capacity.
    pub fn push(&self, record: R) {
        let mut buf = self.inner.lock();
        buf.push_back(record);
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Copy of every record, oldest first.
    pub fn snapshot(&self) -> Vec<R> {
        self.inner.lock().iter().cloned().collect()
    }

    /// Records inside `window`, oldest first. Copied out so aggregation
    /// runs without holding the lock.
    pub fn window_at(&self, window: Window) -> Vec<R> {
        self.inner
            .lock()
            .iter()
            .filter(|r| window.contains(r.timestamp_ms()))
            .cloned()
            .collect()
    }

    /// Apply `update` to the newest record matching `pred`.
    /// Returns whatever `update` returned, or `None` when nothing matched.
    pub fn update_latest<T>(
        &self,
        pred: impl Fn(&R) -> bool,
        update: impl FnOnce(&mut R) -> T,
    ) -> Option<T> {
        let mut buf = self.inner.lock();
        buf.iter_mut().rev().find(|r| pred(r)).map(update)
    }
}

impl<R: Timestamped + Clone> Default for EventLedger<R> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Tick {
        at: i64,
        seq: usize,
    }

    impl Timestamped for Tick {
        fn timestamp_ms(&self) -> i64 {
            self.at
        }
    }

    #[test]
    fn trims_to_the_most_recent_records() {
        let ledger = EventLedger::with_capacity(100);
        for seq in 0..250 {
            ledger.push(Tick { at: seq as i64, seq });
        }

        let records = ledger.snapshot();
        assert_eq!(records.len(), 100);
        let seqs: Vec<usize> = records.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, (150..250).collect::<Vec<_>>());
    }

    #[test]
    fn below_capacity_keeps_everything() {
        let ledger = EventLedger::with_capacity(10);
        for seq in 0..10 {
            ledger.push(Tick { at: 0, seq });
        }
        assert_eq!(ledger.len(), 10);
        assert_eq!(ledger.snapshot()[0].seq, 0);
    }

    #[test]
    fn window_excludes_the_start_boundary() {
        let ledger = EventLedger::with_capacity(10);
        ledger.push(Tick { at: 1_000, seq: 0 });
        ledger.push(Tick { at: 1_001, seq: 1 });
        ledger.push(Tick { at: 2_000, seq: 2 });

        let hits = ledger.window_at(Window::trailing(1_000, 2_000));
        let seqs: Vec<usize> = hits.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn update_latest_touches_only_the_newest_match() {
        let ledger = EventLedger::with_capacity(10);
        ledger.push(Tick { at: 1, seq: 7 });
        ledger.push(Tick { at: 2, seq: 7 });

        let touched = ledger.update_latest(|t| t.seq == 7, |t| {
            t.at = 99;
            t.at
        });
        assert_eq!(touched, Some(99));
        let ats: Vec<i64> = ledger.snapshot().iter().map(|t| t.at).collect();
        assert_eq!(ats, vec![1, 99]);

        assert_eq!(ledger.update_latest(|t| t.seq == 8, |_| ()), None);
    }

    #[test]
    fn midpoint_splits_window_in_half() {
        let w = Window::trailing(3_600_000, 10_000_000);
        assert_eq!(w.midpoint(), 10_000_000 - 1_800_000);
        assert_eq!(w.duration_ms(), 3_600_000);
    }
}
