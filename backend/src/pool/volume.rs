use std::collections::VecDeque;

pub const DAY_MS: u64 = 24 * 60 * 60 * 1_000;

/// A timestamped value used inside the rolling window
#[derive(Clone, Debug)]
struct TimedValue {
    ts_ms: u64,
    value: f64,
}

/// Rolling sum over a fixed time horizon (24h by default).
///
/// Values are expected in timestamp order; late values are still summed and
/// age out with the rest.
#[derive(Clone, Debug)]
pub struct RollingVolume {
    values: VecDeque<TimedValue>,
    total: f64,
    max_age_ms: u64,
}

impl Default for RollingVolume {
    fn default() -> Self {
        Self::new(DAY_MS)
    }
}

impl RollingVolume {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            values: VecDeque::new(),
            total: 0.0,
            max_age_ms,
        }
    }

    pub fn push(&mut self, ts_ms: u64, value: f64) {
        if !value.is_finite() || value <= 0.0 {
            self.evict_old(ts_ms);
            return;
        }

        self.values.push_back(TimedValue { ts_ms, value });
        self.total += value;
        self.evict_old(ts_ms);
    }

    /// Evict values older than max_age
    fn evict_old(&mut self, now_ms: u64) {
        while let Some(front) = self.values.front() {
            if now_ms.saturating_sub(front.ts_ms) <= self.max_age_ms {
                break;
            }
            if let Some(removed) = self.values.pop_front() {
                self.total -= removed.value;
            }
        }

        if self.values.is_empty() {
            // drop accumulated float error
            self.total = 0.0;
        }
    }

    pub fn total(&self) -> f64 {
        self.total.max(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_within_horizon() {
        let mut w = RollingVolume::new(1_000);
        w.push(0, 1.5);
        w.push(500, 2.0);
        assert_eq!(w.total(), 3.5);

        w.push(1_200, 1.0);
        assert_eq!(w.total(), 3.0);

        w.push(5_000, 0.0);
        assert_eq!(w.total(), 0.0);
        assert!(w.is_empty());
    }

    #[test]
    fn ignores_non_positive_values() {
        let mut w = RollingVolume::default();
        w.push(0, -1.0);
        w.push(0, f64::NAN);
        assert!(w.is_empty());
    }
}
