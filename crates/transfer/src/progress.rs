use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fraction of `total` covered by `uploaded`, clamped to `[0, 1]`.
///
/// An empty job counts as complete only once something marks it so; until
/// then it reports zero.
pub fn fraction(uploaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (uploaded as f64 / total as f64).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` acknowledged at the current instant.
    pub fn add_sample(&self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&self, bytes: u64, now: Instant) {
        let mut s = self.inner.lock().unwrap();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap();
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        // The first sample opens the window; its bytes predate it.
        let total_bytes: u64 = s.samples[1..].iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        self.inner.lock().unwrap().samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(fraction(0, 0), 0.0);
        assert_eq!(fraction(5, 10), 0.5);
        assert_eq!(fraction(15, 10), 1.0);
    }

    #[test]
    fn speed_needs_two_samples() {
        let calc = SpeedCalculator::default();
        assert_eq!(calc.bytes_per_second(), 0.0);
        calc.add_sample(100);
        assert_eq!(calc.bytes_per_second(), 0.0);
        assert!(calc.eta(1000).is_none());
    }

    #[test]
    fn speed_over_window() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(10)), None);
        let start = Instant::now();
        calc.add_sample_at(0, start);
        calc.add_sample_at(500, start + Duration::from_secs(1));
        calc.add_sample_at(500, start + Duration::from_secs(2));

        let speed = calc.bytes_per_second();
        assert!((speed - 500.0).abs() < 1e-6, "speed was {speed}");
        assert_eq!(calc.eta(1000), Some(Duration::from_secs(2)));
    }

    #[test]
    fn old_samples_are_pruned() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(1)), None);
        let start = Instant::now();
        calc.add_sample_at(1_000_000, start);
        calc.add_sample_at(10, start + Duration::from_secs(5));
        calc.add_sample_at(10, start + Duration::from_secs(6));

        let speed = calc.bytes_per_second();
        assert!((speed - 10.0).abs() < 1e-6, "speed was {speed}");
    }

    #[test]
    fn max_samples_limits_history() {
        let calc = SpeedCalculator::new(Some(Duration::from_secs(60)), Some(3));
        let start = Instant::now();
        for i in 0..10 {
            calc.add_sample_at(1, start + Duration::from_millis(i * 10));
        }
        assert_eq!(calc.inner.lock().unwrap().samples.len(), 3);
    }

    #[test]
    fn reset_clears() {
        let calc = SpeedCalculator::default();
        calc.add_sample(1);
        calc.add_sample(1);
        calc.reset();
        assert_eq!(calc.bytes_per_second(), 0.0);
    }
}
