use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide traffic and connection counters, shared by `Arc` across both
/// front-ends, the relay, and the supervisor's observation API.
///
/// `active_relays` is signed only so the "never negative" invariant can be
/// asserted in debug builds; in practice it never goes negative.
#[derive(Debug, Default)]
pub struct Counters {
    pub bytes_up: AtomicU64,
    pub bytes_down: AtomicU64,
    pub active_relays: AtomicI64,
    pub total_relays: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes_up(&self, n: u64) {
        self.bytes_up.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, n: u64) {
        self.bytes_down.fetch_add(n, Ordering::Relaxed);
    }

    /// Called once per admitted connection, before the relay starts.
    pub fn relay_started(&self) {
        self.total_relays.fetch_add(1, Ordering::Relaxed);
        let active = self.active_relays.fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert!(active >= 0, "active_relays went negative");
    }

    /// Called once per relay that exits, whether cleanly or on error.
    pub fn relay_finished(&self) {
        let active = self.active_relays.fetch_sub(1, Ordering::Relaxed) - 1;
        debug_assert!(active >= 0, "active_relays went negative");
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            bytes_up: self.bytes_up.load(Ordering::Relaxed),
            bytes_down: self.bytes_down.load(Ordering::Relaxed),
            active_relays: self.active_relays.load(Ordering::Relaxed),
            total_relays: self.total_relays.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time, non-linearizable read of [`Counters`]. Readers may see
/// slightly stale values across fields; monotonicity within one field is
/// preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub active_relays: i64,
    pub total_relays: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_lifecycle_keeps_active_non_negative() {
        let counters = Counters::new();
        counters.relay_started();
        counters.relay_started();
        assert_eq!(counters.snapshot().active_relays, 2);
        assert_eq!(counters.snapshot().total_relays, 2);

        counters.relay_finished();
        assert_eq!(counters.snapshot().active_relays, 1);

        counters.relay_finished();
        assert_eq!(counters.snapshot().active_relays, 0);
    }

    #[test]
    fn test_byte_counters_accumulate() {
        let counters = Counters::new();
        counters.add_bytes_up(100);
        counters.add_bytes_up(50);
        counters.add_bytes_down(10);

        let snap = counters.snapshot();
        assert_eq!(snap.bytes_up, 150);
        assert_eq!(snap.bytes_down, 10);
    }
}
