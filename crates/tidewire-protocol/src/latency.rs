//! Round-trip time and clock offset estimation.

use std::time::Duration;

/// Smoothing applied to the RTT variance.
const VARIANCE_SMOOTHING: f64 = 0.25;

/// Largest round trip accepted by default.
pub const DEFAULT_SAMPLE_LIMIT: Duration = Duration::from_secs(10);

/// Exponentially smoothed RTT, RTT variance and clock offset.
///
/// The first sample seeds the estimate directly; later samples are blended with the
/// configured smoothing factor. Samples above the limit are discarded.
#[derive(Debug, Clone)]
pub struct LatencyEstimator {
    smoothing: f64,
    sample_limit: Duration,
    /// Smoothed round-trip time in seconds
    rtt: Option<f64>,
    /// Smoothed absolute deviation of the RTT in seconds
    rtt_variance: f64,
    /// Remote clock minus local clock in seconds
    clock_offset: Option<f64>,
}

impl LatencyEstimator {
    /// Creates an estimator with the given smoothing factor (clamped to `0..=1`).
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: f64::from(smoothing).clamp(0.0, 1.0),
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            rtt: None,
            rtt_variance: 0.0,
            clock_offset: None,
        }
    }

    /// Replaces the largest round trip that is still folded into the estimate.
    pub fn with_sample_limit(mut self, limit: Duration) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Folds a new RTT sample into the estimate. Returns false if it was over the limit.
    pub fn update_rtt(&mut self, sample: Duration) -> bool {
        if sample > self.sample_limit {
            return false;
        }
        let sample = sample.as_secs_f64();
        match self.rtt {
            None => {
                self.rtt = Some(sample);
                self.rtt_variance = sample / 2.0;
            }
            Some(rtt) => {
                let deviation = (rtt - sample).abs();
                self.rtt_variance =
                    (1.0 - VARIANCE_SMOOTHING) * self.rtt_variance + VARIANCE_SMOOTHING * deviation;
                self.rtt = Some((1.0 - self.smoothing) * rtt + self.smoothing * sample);
            }
        }
        true
    }

    /// Folds a new clock offset sample (seconds) into the estimate.
    pub fn update_clock_offset(&mut self, sample: f64) {
        self.clock_offset = Some(match self.clock_offset {
            None => sample,
            Some(offset) => (1.0 - self.smoothing) * offset + self.smoothing * sample,
        });
    }

    /// Records a ping round trip. All times are seconds on their own clocks.
    ///
    /// `sent_at` is the echoed local send time, `remote_time` the peer's clock when it
    /// answered and `now` the local receive time. The echoed values come off the wire, so a
    /// round trip that is negative, not finite or over the limit is ignored, as is a
    /// non-finite remote time. Returns true if the sample was used.
    pub fn record_ping(&mut self, sent_at: f64, remote_time: f64, now: f64) -> bool {
        if !remote_time.is_finite() {
            return false;
        }
        let Ok(rtt) = Duration::try_from_secs_f64(now - sent_at) else {
            return false;
        };
        if !self.update_rtt(rtt) {
            return false;
        }
        self.update_clock_offset(remote_time + rtt.as_secs_f64() / 2.0 - now);
        true
    }

    /// Smoothed RTT, if any sample has been taken.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt.map(Duration::from_secs_f64)
    }

    /// Smoothed RTT variance.
    pub fn rtt_variance(&self) -> Duration {
        Duration::from_secs_f64(self.rtt_variance)
    }

    /// Retransmission timeout, `rtt + 4 * variance`.
    pub fn rto(&self) -> Option<Duration> {
        self.rtt.map(|rtt| Duration::from_secs_f64(rtt + 4.0 * self.rtt_variance))
    }

    /// Time to wait before resending: the larger of `floor` and the RTO.
    pub fn resend_after(&self, floor: Duration) -> Duration {
        self.rto().map_or(floor, |rto| rto.max(floor))
    }

    /// Estimated remote clock minus local clock, in seconds.
    pub fn clock_offset(&self) -> Option<f64> {
        self.clock_offset
    }
}

impl Default for LatencyEstimator {
    fn default() -> Self {
        Self::new(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(d: Option<Duration>) -> u128 {
        d.map(|d| d.as_millis()).unwrap_or(0)
    }

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut estimator = LatencyEstimator::new(0.1);
        assert!(estimator.rtt().is_none());
        assert!(estimator.rto().is_none());

        estimator.update_rtt(Duration::from_millis(100));
        assert_eq!(millis(estimator.rtt()), 100);
        assert_eq!(estimator.rtt_variance().as_millis(), 50);
        // 100 + 4 * 50
        assert_eq!(millis(estimator.rto()), 300);
    }

    #[test]
    fn test_smoothing_moves_toward_samples() {
        let mut estimator = LatencyEstimator::new(0.1);
        estimator.update_rtt(Duration::from_millis(100));
        estimator.update_rtt(Duration::from_millis(200));
        // 0.9 * 100 + 0.1 * 200
        assert_eq!(millis(estimator.rtt()), 110);
    }

    #[test]
    fn test_resend_after_uses_floor() {
        let mut estimator = LatencyEstimator::new(0.1);
        let floor = Duration::from_millis(200);
        assert_eq!(estimator.resend_after(floor), floor);

        estimator.update_rtt(Duration::from_millis(10));
        assert_eq!(estimator.resend_after(floor), floor);

        estimator.update_rtt(Duration::from_millis(500));
        assert!(estimator.resend_after(floor) > floor);
    }

    #[test]
    fn test_ping_derives_offset() {
        let mut estimator = LatencyEstimator::new(0.1);
        // Sent at 1.0 local, server answered at 11.05 on its clock, received at 1.1 local.
        assert!(estimator.record_ping(1.0, 11.05, 1.1));
        assert_eq!(millis(estimator.rtt()), 100);
        let offset = estimator.clock_offset().unwrap();
        assert!((offset - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_ping_from_future_is_ignored() {
        let mut estimator = LatencyEstimator::new(0.1);
        assert!(!estimator.record_ping(5.0, 0.0, 4.0));
        assert!(estimator.rtt().is_none());
        assert!(estimator.clock_offset().is_none());
    }

    #[test]
    fn test_ping_with_absurd_echo_is_ignored() {
        let mut estimator = LatencyEstimator::new(0.1);
        // Far enough in the past to overflow a Duration.
        assert!(!estimator.record_ping(-1e20, 0.0, 2.0));
        // Representable, but longer than any real round trip.
        assert!(!estimator.record_ping(-1e6, 0.0, 2.0));
        assert!(!estimator.record_ping(f64::NAN, 0.0, 2.0));
        assert!(!estimator.record_ping(1.0, f64::INFINITY, 1.1));
        assert!(estimator.rtt().is_none());
        assert!(estimator.clock_offset().is_none());

        assert!(estimator.record_ping(1.0, 1.05, 1.1));
        assert_eq!(millis(estimator.rtt()), 100);
    }

    #[test]
    fn test_sample_limit_applies_to_acknowledgements() {
        let mut estimator = LatencyEstimator::new(0.1).with_sample_limit(Duration::from_secs(1));
        assert!(!estimator.update_rtt(Duration::from_secs(2)));
        assert!(estimator.rtt().is_none());
        assert!(estimator.update_rtt(Duration::from_secs(1)));
        assert_eq!(millis(estimator.rtt()), 1000);
    }
}
