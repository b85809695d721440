//! C2: per-follower failure detector (spec §4.11).
//!
//! A phi-accrual-style detector fed only by `report_heartbeat()` on
//! successful replication round-trips. `is_healthy` derives a suspicion
//! level from how long it has been since the last successful heartbeat
//! relative to the observed mean inter-arrival interval, rather than a
//! fixed timeout -- the same shape as the classic Akka/Cassandra phi-accrual
//! detector, adapted here to the single signal the replicator already
//! produces (no raw ping samples, just "did the round succeed").

use crate::clock::{now, Instant};

const DEFAULT_PHI_THRESHOLD: f64 = 8.0;
const MIN_STD_DEV_MS: f64 = 50.0;
const EWMA_ALPHA: f64 = 0.2;

#[derive(Debug)]
pub struct FailureDetector {
    phi_threshold: f64,
    last_heartbeat: Option<Instant>,
    mean_interval_ms: f64,
    variance_ms2: f64,
    monitoring: bool,
}

impl FailureDetector {
    pub fn new() -> Self {
        FailureDetector::with_threshold(DEFAULT_PHI_THRESHOLD)
    }

    pub fn with_threshold(phi_threshold: f64) -> Self {
        FailureDetector {
            phi_threshold,
            last_heartbeat: None,
            mean_interval_ms: 0.0,
            variance_ms2: 0.0,
            monitoring: false,
        }
    }

    /// Call on every successful AppendEntries/InstallSnapshot round-trip.
    pub fn report_heartbeat(&mut self) {
        let now = now();
        if let Some(last) = self.last_heartbeat {
            let interval_ms = now.duration_since(last).as_secs_f64() * 1000.0;
            if self.monitoring {
                let delta = interval_ms - self.mean_interval_ms;
                self.mean_interval_ms += EWMA_ALPHA * delta;
                self.variance_ms2 =
                    (1.0 - EWMA_ALPHA) * (self.variance_ms2 + EWMA_ALPHA * delta * delta);
            } else {
                self.mean_interval_ms = interval_ms;
            }
        }
        self.last_heartbeat = Some(now);
        self.monitoring = true;
    }

    /// True once at least one heartbeat has been observed.
    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    /// True if the suspicion level (phi) is below the configured threshold.
    /// A detector that has never seen a heartbeat is considered healthy --
    /// it simply hasn't started monitoring yet (spec: "When
    /// `IsMonitoring && !IsHealthy`" gates eviction, so an unmonitored
    /// member is never evicted).
    pub fn is_healthy(&self) -> bool {
        match self.last_heartbeat {
            None => true,
            Some(last) => {
                let elapsed_ms = now().duration_since(last).as_secs_f64() * 1000.0;
                self.phi(elapsed_ms) < self.phi_threshold
            }
        }
    }

    fn phi(&self, elapsed_ms: f64) -> f64 {
        let std_dev = self.variance_ms2.sqrt().max(MIN_STD_DEV_MS);
        let mean = self.mean_interval_ms.max(std_dev);
        // Probability the next heartbeat still hasn't arrived after
        // `elapsed_ms`, modeled as a normal CDF tail; phi grows unbounded as
        // that probability shrinks.
        let y = (elapsed_ms - mean) / std_dev;
        let p_later = 1.0 - normal_cdf(y);
        if p_later <= f64::MIN_POSITIVE {
            f64::INFINITY
        } else {
            -p_later.log10()
        }
    }
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Abramowitz-Stegun approximation of the standard normal CDF. Good enough
/// for a suspicion-level heuristic; we are not computing a statistical test.
fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmonitored_detector_is_healthy() {
        let fd = FailureDetector::new();
        assert!(!fd.is_monitoring());
        assert!(fd.is_healthy());
    }

    #[test]
    fn steady_heartbeats_stay_healthy() {
        let mut fd = FailureDetector::new();
        for _ in 0..5 {
            fd.report_heartbeat();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(fd.is_monitoring());
        assert!(fd.is_healthy());
    }
}
