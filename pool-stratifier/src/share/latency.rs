//! Rolling share-validation latency window (spec.md §4.3): a fixed-size
//! ring buffer of the last 100 measurements, reporting p50/p95/p99 in
//! microseconds.

use std::sync::Mutex;

const WINDOW_SIZE: usize = 100;

#[derive(Default)]
pub struct LatencyWindow {
    inner: Mutex<LatencyInner>,
}

#[derive(Default)]
struct LatencyInner {
    samples: Vec<u64>,
    next: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyPercentiles {
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
}

impl LatencyWindow {
    pub fn new() -> Self {
        LatencyWindow::default()
    }

    pub fn record(&self, micros: u64) {
        let mut inner = self.inner.lock().expect("latency window lock poisoned");
        if inner.samples.len() < WINDOW_SIZE {
            inner.samples.push(micros);
        } else {
            let idx = inner.next;
            inner.samples[idx] = micros;
        }
        inner.next = (inner.next + 1) % WINDOW_SIZE;
    }

    pub fn percentiles(&self) -> Option<LatencyPercentiles> {
        let inner = self.inner.lock().expect("latency window lock poisoned");
        if inner.samples.is_empty() {
            return None;
        }
        let mut sorted = inner.samples.clone();
        sorted.sort_unstable();
        let pick = |pct: f64| -> u64 {
            let idx = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };
        Some(LatencyPercentiles {
            p50: pick(0.50),
            p95: pick(0.95),
            p99: pick(0.99),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_has_no_percentiles() {
        let window = LatencyWindow::new();
        assert!(window.percentiles().is_none());
    }

    #[test]
    fn percentiles_track_a_uniform_distribution() {
        let window = LatencyWindow::new();
        for i in 1..=100u64 {
            window.record(i);
        }
        let p = window.percentiles().unwrap();
        assert!(p.p50 >= 40 && p.p50 <= 60);
        assert!(p.p99 >= p.p95 && p.p95 >= p.p50);
    }

    #[test]
    fn window_wraps_after_capacity() {
        let window = LatencyWindow::new();
        for i in 0..150u64 {
            window.record(i);
        }
        // Only the most recent 100 samples (50..=149) should remain.
        let p = window.percentiles().unwrap();
        assert!(p.p50 >= 50);
    }
}
