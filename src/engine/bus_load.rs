//! LIN bus-load windowing accountant (spec §4.7 "Bus load").
//!
//! Buckets busy time by `floor((ts - start_ts)/W)`, converting occupancy to
//! a percentage per window. Interior windows with no traffic are zero-filled
//! so the finalizer (§4.10) can report a dense per-window series.

use std::collections::BTreeMap;

/// Accumulates LIN frame airtime into fixed-width windows.
#[derive(Debug, Clone)]
pub struct BusLoadAccountant {
    window_s: f64,
    start_ts: Option<f64>,
    busy_by_window: BTreeMap<i64, f64>,
    pub total_busy_s: f64,
}

impl BusLoadAccountant {
    pub fn new(window_s: f64) -> Self {
        Self {
            window_s,
            start_ts: None,
            busy_by_window: BTreeMap::new(),
            total_busy_s: 0.0,
        }
    }

    /// Records `duration_s` of bus-busy time starting at `ts`.
    pub fn observe(&mut self, ts: f64, duration_s: f64) {
        let start_ts = *self.start_ts.get_or_insert(ts);
        let bucket = ((ts - start_ts) / self.window_s).floor() as i64;
        *self.busy_by_window.entry(bucket).or_insert(0.0) += duration_s;
        self.total_busy_s += duration_s;
    }

    /// Dense per-window busy percentage series, zero-filling interior gaps
    /// between the first and last window with any observation.
    pub fn windows_percent(&self) -> Vec<f64> {
        let (Some(&min), Some(&max)) = (self.busy_by_window.keys().min(), self.busy_by_window.keys().max()) else {
            return Vec::new();
        };
        (min..=max)
            .map(|bucket| {
                let busy = self.busy_by_window.get(&bucket).copied().unwrap_or(0.0);
                (busy / self.window_s * 100.0).min(100.0)
            })
            .collect()
    }

    pub fn peak_percent(&self) -> f64 {
        self.windows_percent().into_iter().fold(0.0, f64::max)
    }

    pub fn average_percent(&self) -> f64 {
        let windows = self.windows_percent();
        if windows.is_empty() {
            0.0
        } else {
            windows.iter().sum::<f64>() / windows.len() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_time_accumulates_within_a_window() {
        let mut acc = BusLoadAccountant::new(1.0);
        acc.observe(0.1, 0.2);
        acc.observe(0.5, 0.3);
        assert_eq!(acc.total_busy_s, 0.5);
        assert_eq!(acc.windows_percent(), vec![50.0]);
    }

    #[test]
    fn interior_gaps_are_zero_filled() {
        let mut acc = BusLoadAccountant::new(1.0);
        acc.observe(0.0, 0.1);
        acc.observe(2.5, 0.1);
        let windows = acc.windows_percent();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[1], 0.0);
    }
}
