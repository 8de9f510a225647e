//! Rate-limited diagnostics: roughly one log line per 100 occurrences,
//! to avoid log storms on a sustained fault.

use std::sync::atomic::{AtomicU64, Ordering};

/// A counter that logs via `tracing::warn!` on every Nth occurrence and
/// silently increments the rest of the time. `N` defaults to 100; tests
/// use a smaller period to keep scenarios short.
pub struct RateLimited {
    count: AtomicU64,
    period: u64,
    label: &'static str,
}

impl RateLimited {
    pub const fn new(label: &'static str) -> Self {
        Self {
            count: AtomicU64::new(0),
            period: 100,
            label,
        }
    }

    #[cfg(test)]
    pub const fn with_period(label: &'static str, period: u64) -> Self {
        Self {
            count: AtomicU64::new(0),
            period,
            label,
        }
    }

    /// Record one occurrence, logging if this is the Nth since the last log.
    pub fn record(&self) -> u64 {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if n % self.period == 0 {
            tracing::warn!(count = n, "{}: {} occurrences", self.label, n);
        }
        n
    }

    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_every_occurrence() {
        let counter = RateLimited::with_period("test", 5);
        for _ in 0..12 {
            counter.record();
        }
        assert_eq!(counter.total(), 12);
    }
}
