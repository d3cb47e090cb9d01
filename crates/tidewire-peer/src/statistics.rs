//! Per-peer traffic counters.

/// Traffic statistics for one peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerStatistics {
    /// Datagrams sent to this peer, retransmissions included
    pub packets_sent: u64,
    /// Datagrams received from this peer
    pub packets_received: u64,
    /// Reliable datagrams abandoned after exhausting their retries
    pub packets_lost: u64,
    /// Datagrams sent again because no acknowledgement arrived in time
    pub retransmissions: u64,
    /// Bytes sent to this peer, headers included
    pub bytes_sent: u64,
    /// Bytes received from this peer, headers included
    pub bytes_received: u64,
}

impl PeerStatistics {
    fn ratio(part: u64, whole: u64) -> f32 {
        if whole == 0 {
            0.0
        } else {
            part as f32 / whole as f32
        }
    }

    /// Share of sent datagrams that were abandoned (0.0 to 1.0).
    pub fn packet_loss_rate(&self) -> f32 {
        Self::ratio(self.packets_lost, self.packets_sent)
    }

    /// Share of sent datagrams that were retransmissions (0.0 to 1.0).
    pub fn retransmission_rate(&self) -> f32 {
        Self::ratio(self.retransmissions, self.packets_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_are_zero_without_traffic() {
        let stats = PeerStatistics::default();
        assert_eq!(stats.packet_loss_rate(), 0.0);
        assert_eq!(stats.retransmission_rate(), 0.0);
    }

    #[test]
    fn test_rates_count_against_datagrams_sent() {
        // 15 attempts per abandoned datagram: one first send plus 14 retries.
        let stats = PeerStatistics {
            packets_sent: 30,
            packets_lost: 2,
            retransmissions: 28,
            ..Default::default()
        };
        assert!((stats.packet_loss_rate() - 2.0 / 30.0).abs() < 1e-6);
        assert!((stats.retransmission_rate() - 28.0 / 30.0).abs() < 1e-6);
    }
}
