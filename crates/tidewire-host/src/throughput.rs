use std::{
    collections::VecDeque,
    fmt::{self, Debug, Display},
    time::{Duration, Instant},
};

/// Measures traffic over fixed windows.
///
/// Bytes and packets are accumulated into the current window; when a window elapses it is
/// closed and kept in a short history used for averages.
pub struct ThroughputMonitoring {
    window: Duration,
    window_start: Instant,
    current_bytes: u64,
    current_packets: u64,
    history: VecDeque<ThroughputEntry>,
    history_limit: usize,
}

#[derive(Debug, Clone, Copy)]
struct ThroughputEntry {
    bytes: u64,
    packets: u64,
}

impl ThroughputMonitoring {
    /// Creates a monitor with the given window length that keeps `history_limit` windows.
    pub fn new(window: Duration, history_limit: usize, now: Instant) -> ThroughputMonitoring {
        ThroughputMonitoring {
            window,
            window_start: now,
            current_bytes: 0,
            current_packets: 0,
            history: VecDeque::with_capacity(history_limit),
            history_limit: history_limit.max(1),
        }
    }

    /// Adds one packet of `bytes` to the current window.
    pub fn record(&mut self, bytes: usize) {
        self.current_bytes += bytes as u64;
        self.current_packets += 1;
    }

    /// Closes the current window if it elapsed. Returns true when a window completed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) < self.window {
            return false;
        }
        if self.history.len() == self.history_limit {
            self.history.pop_front();
        }
        let entry = ThroughputEntry { bytes: self.current_bytes, packets: self.current_packets };
        self.history.push_back(entry);
        self.current_bytes = 0;
        self.current_packets = 0;
        self.window_start = now;
        true
    }

    /// Bytes per second measured over the most recent completed window.
    pub fn last_rate(&self) -> f64 {
        self.history.back().map(|entry| self.per_second(entry.bytes)).unwrap_or(0.0)
    }

    /// Bytes per second averaged over the kept windows.
    pub fn average_rate(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let total: u64 = self.history.iter().map(|entry| entry.bytes).sum();
        self.per_second(total) / self.history.len() as f64
    }

    /// Packets in the most recent completed window.
    pub fn last_packets(&self) -> u64 {
        self.history.back().map(|entry| entry.packets).unwrap_or(0)
    }

    /// Resets all measurements.
    pub fn reset(&mut self, now: Instant) {
        self.current_bytes = 0;
        self.current_packets = 0;
        self.history.clear();
        self.window_start = now;
    }

    fn per_second(&self, bytes: u64) -> f64 {
        let seconds = self.window.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        bytes as f64 / seconds
    }
}

impl Debug for ThroughputMonitoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(
            f,
            "Last Rate: {:.1} B/s, Window: {:#?}, Average Rate: {:.1} B/s",
            self.last_rate(),
            self.window,
            self.average_rate()
        )
    }
}

impl Display for ThroughputMonitoring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:.1} B/s (avg {:.1} B/s)", self.last_rate(), self.average_rate())
    }
}
