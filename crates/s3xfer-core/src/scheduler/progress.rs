//! Progress snapshots for one meta-request (bytes done, rate, ETA).

/// Snapshot sent after each part succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    /// Bytes of completed parts.
    pub bytes_done: u64,
    /// Object size; 0 while unknown.
    pub total_bytes: u64,
    /// Seconds since the meta-request started.
    pub elapsed_secs: f64,
    pub parts_done: usize,
    pub part_count: usize,
}

impl ProgressStats {
    /// Transfer rate in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if the rate is 0).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.total_bytes.saturating_sub(self.bytes_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.bytes_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.parts_done >= self.part_count { 1.0 } else { 0.0 };
        }
        (self.bytes_done as f64 / self.total_bytes as f64).min(1.0)
    }
}
