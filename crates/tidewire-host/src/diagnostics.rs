//! Transport-wide counters, latency estimates and throughput.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tidewire_protocol::LatencyEstimator;

use crate::throughput::ThroughputMonitoring;

/// Length of one throughput window.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(1);
/// Number of throughput windows kept for averages.
const THROUGHPUT_HISTORY: usize = 10;

/// Point-in-time copy of the diagnostics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiagnosticsSnapshot {
    /// Datagrams handed to the socket.
    pub packets_sent: u64,
    /// Datagrams read from the socket.
    pub packets_received: u64,
    /// Bytes handed to the socket.
    pub bytes_sent: u64,
    /// Bytes read from the socket.
    pub bytes_received: u64,
    /// Datagrams dropped because their header did not decode.
    pub malformed_packets: u64,
    /// Reliable datagrams transmitted again.
    pub retransmissions: u64,
    /// Reliable datagrams that ran out of retries.
    pub abandoned: u64,
    /// Messages dropped because the send queue was full.
    pub queue_overflows: u64,
    /// Smoothed round-trip time, once measured.
    pub rtt: Option<Duration>,
    /// Smoothed RTT variance.
    pub rtt_variance: Duration,
    /// Retransmission timeout derived from the RTT.
    pub rto: Option<Duration>,
    /// Remote clock minus local clock in seconds, once measured.
    pub clock_offset: Option<f64>,
    /// Outbound bytes per second over the last window.
    pub send_rate: f64,
    /// Inbound bytes per second over the last window.
    pub receive_rate: f64,
}

/// Shared diagnostics for one transport.
///
/// Counters are lock-free; the latency estimator and throughput monitors sit behind short
/// mutexes.
#[derive(Debug)]
pub struct Diagnostics {
    packets_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    malformed_packets: AtomicU64,
    retransmissions: AtomicU64,
    abandoned: AtomicU64,
    queue_overflows: AtomicU64,
    latency: Mutex<LatencyEstimator>,
    send_throughput: Mutex<ThroughputMonitoring>,
    receive_throughput: Mutex<ThroughputMonitoring>,
}

impl Diagnostics {
    /// Creates zeroed diagnostics with the given RTT smoothing factor.
    ///
    /// Round trips longer than `sample_limit` are left out of the latency estimate.
    pub fn new(rtt_smoothing: f32, sample_limit: Duration, now: Instant) -> Self {
        let latency = LatencyEstimator::new(rtt_smoothing).with_sample_limit(sample_limit);
        Self {
            packets_sent: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            malformed_packets: AtomicU64::new(0),
            retransmissions: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            latency: Mutex::new(latency),
            send_throughput: Mutex::new(ThroughputMonitoring::new(
                THROUGHPUT_WINDOW,
                THROUGHPUT_HISTORY,
                now,
            )),
            receive_throughput: Mutex::new(ThroughputMonitoring::new(
                THROUGHPUT_WINDOW,
                THROUGHPUT_HISTORY,
                now,
            )),
        }
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.send_throughput.lock().record(bytes);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
        self.receive_throughput.lock().record(bytes);
    }

    pub(crate) fn record_malformed(&self) {
        self.malformed_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Folds a handshake or ping round trip into the latency estimate.
    ///
    /// Returns false if the echoed times did not yield a usable sample.
    pub(crate) fn record_ping(&self, sent_at: f64, remote_time: f64, now: f64) -> bool {
        self.latency.lock().record_ping(sent_at, remote_time, now)
    }

    /// Folds an acknowledgement round trip into the RTT estimate.
    pub(crate) fn record_rtt(&self, sample: Duration) {
        self.latency.lock().update_rtt(sample);
    }

    /// Time to wait before resending a reliable datagram.
    pub fn resend_after(&self, floor: Duration) -> Duration {
        self.latency.lock().resend_after(floor)
    }

    /// Closes elapsed throughput windows.
    pub(crate) fn tick(&self, now: Instant) {
        self.send_throughput.lock().tick(now);
        self.receive_throughput.lock().tick(now);
    }

    /// Copies every value out.
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let latency = self.latency.lock().clone();
        DiagnosticsSnapshot {
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            malformed_packets: self.malformed_packets.load(Ordering::Relaxed),
            retransmissions: self.retransmissions.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            rtt: latency.rtt(),
            rtt_variance: latency.rtt_variance(),
            rto: latency.rto(),
            clock_offset: latency.clock_offset(),
            send_rate: self.send_throughput.lock().last_rate(),
            receive_rate: self.receive_throughput.lock().last_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_counters() {
        let diagnostics = Diagnostics::new(0.1, LIMIT, Instant::now());
        diagnostics.record_sent(100);
        diagnostics.record_sent(50);
        diagnostics.record_received(20);
        diagnostics.record_malformed();
        diagnostics.record_retransmission();
        diagnostics.record_abandoned();
        diagnostics.record_queue_overflow();

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.packets_sent, 2);
        assert_eq!(snapshot.bytes_sent, 150);
        assert_eq!(snapshot.packets_received, 1);
        assert_eq!(snapshot.bytes_received, 20);
        assert_eq!(snapshot.malformed_packets, 1);
        assert_eq!(snapshot.retransmissions, 1);
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.queue_overflows, 1);
        assert!(snapshot.rtt.is_none());
    }

    #[test]
    fn test_resend_after_follows_rtt() {
        let diagnostics = Diagnostics::new(0.1, LIMIT, Instant::now());
        let floor = Duration::from_millis(200);
        assert_eq!(diagnostics.resend_after(floor), floor);

        // rto = 0.4 + 4 * 0.2 = 1.2s
        diagnostics.record_rtt(Duration::from_millis(400));
        let resend = diagnostics.resend_after(floor).as_secs_f64();
        assert!((resend - 1.2).abs() < 1e-6);
    }

    #[test]
    fn test_ping_sets_clock_offset() {
        let diagnostics = Diagnostics::new(0.1, LIMIT, Instant::now());
        assert!(diagnostics.record_ping(1.0, 11.05, 1.1));
        let snapshot = diagnostics.snapshot();
        let rtt = snapshot.rtt.unwrap().as_secs_f64();
        assert!((rtt - 0.1).abs() < 1e-6);
        let offset = snapshot.clock_offset.unwrap();
        assert!((offset - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_bogus_ping_echo_leaves_estimate_alone() {
        let diagnostics = Diagnostics::new(0.1, LIMIT, Instant::now());
        assert!(!diagnostics.record_ping(-1e20, 0.0, 1.0));
        assert!(!diagnostics.record_ping(-10.0, 0.0, 1.0));
        diagnostics.record_rtt(Duration::from_secs(6));

        let snapshot = diagnostics.snapshot();
        assert!(snapshot.rtt.is_none());
        assert!(snapshot.clock_offset.is_none());
    }

    #[test]
    fn test_tick_produces_rates() {
        let start = Instant::now();
        let diagnostics = Diagnostics::new(0.1, LIMIT, start);
        diagnostics.record_sent(1000);
        diagnostics.record_received(250);
        diagnostics.tick(start + THROUGHPUT_WINDOW);

        let snapshot = diagnostics.snapshot();
        assert_eq!(snapshot.send_rate, 1000.0);
        assert_eq!(snapshot.receive_rate, 250.0);
    }
}
