use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected during a fragmentation run
#[derive(Default)]
pub struct FragmentStats {
    pub statements_read: AtomicU64,
    pub statements_routed: AtomicU64,
    pub statements_excluded: AtomicU64,
    pub statements_unrouted: AtomicU64,
    pub blank_deferred: AtomicU64,
    pub blank_attributed: AtomicU64,
    pub blank_dropped: AtomicU64,
    pub datasets_flushed: AtomicU64,
    pub files_written: AtomicU64,
}

impl FragmentStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_read(&self) {
        self.statements_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_routed(&self) {
        self.statements_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_excluded(&self) {
        self.statements_excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_unrouted(&self) {
        self.statements_unrouted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deferred(&self) {
        self.blank_deferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_attributed(&self, count: u64) {
        self.blank_attributed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_dropped(&self, count: u64) {
        self.blank_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_flushed(&self) {
        self.datasets_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_files(&self, count: u64) {
        self.files_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn read(&self) -> u64 {
        self.statements_read.load(Ordering::Relaxed)
    }

    pub fn routed(&self) -> u64 {
        self.statements_routed.load(Ordering::Relaxed)
    }

    pub fn excluded(&self) -> u64 {
        self.statements_excluded.load(Ordering::Relaxed)
    }

    pub fn unrouted(&self) -> u64 {
        self.statements_unrouted.load(Ordering::Relaxed)
    }

    pub fn deferred(&self) -> u64 {
        self.blank_deferred.load(Ordering::Relaxed)
    }

    pub fn attributed(&self) -> u64 {
        self.blank_attributed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.blank_dropped.load(Ordering::Relaxed)
    }

    pub fn flushed(&self) -> u64 {
        self.datasets_flushed.load(Ordering::Relaxed)
    }

    pub fn files(&self) -> u64 {
        self.files_written.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_zero() {
        let stats = FragmentStats::new();
        assert_eq!(stats.read(), 0);
        assert_eq!(stats.routed(), 0);
        assert_eq!(stats.excluded(), 0);
        assert_eq!(stats.unrouted(), 0);
        assert_eq!(stats.deferred(), 0);
        assert_eq!(stats.dropped(), 0);
        assert_eq!(stats.flushed(), 0);
        assert_eq!(stats.files(), 0);
    }

    #[test]
    fn streaming_counters() {
        let stats = FragmentStats::new();
        stats.inc_read();
        stats.inc_read();
        stats.inc_read();
        stats.inc_routed();
        stats.inc_excluded();
        stats.inc_deferred();
        assert_eq!(stats.read(), 3);
        assert_eq!(stats.routed(), 1);
        assert_eq!(stats.excluded(), 1);
        assert_eq!(stats.deferred(), 1);
    }

    #[test]
    fn batch_counters_accumulate() {
        let stats = FragmentStats::new();
        stats.add_attributed(4);
        stats.add_attributed(1);
        stats.add_dropped(2);
        stats.add_files(10);
        stats.add_files(5);
        assert_eq!(stats.attributed(), 5);
        assert_eq!(stats.dropped(), 2);
        assert_eq!(stats.files(), 15);
    }

    #[test]
    fn counters_are_shared_across_threads() {
        let stats = std::sync::Arc::new(FragmentStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        stats.inc_read();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.read(), 1000);
    }
}
