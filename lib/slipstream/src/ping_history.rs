//! Ping history ring and window statistics. Grounded byte-for-byte in
//! `next_ping_history.h::next_route_stats_from_ping_history`, including its safety-offset
//! re-clamping of the window before RTT/jitter/loss are derived.

pub const PING_HISTORY_ENTRY_COUNT: usize = 256;

/// Pongs that would land in the last `SAFETY_SECONDS` of a window are excluded from that window's
/// stats, since we can't yet be sure every pong that belongs in it has arrived.
pub const SAFETY_SECONDS: f64 = 1.0;

const NO_PONG: f64 = -1.0;

#[derive(Debug, Clone, Copy)]
struct Entry {
    sequence: u64,
    time_sent: f64,
    time_received_pong: f64,
}

impl Entry {
    const EMPTY: Entry = Entry { sequence: 0xFFFF_FFFF_FFFF_FFFF, time_sent: 0.0, time_received_pong: NO_PONG };
}

pub struct PingHistory {
    entries: [Entry; PING_HISTORY_ENTRY_COUNT],
    next_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteStats {
    pub rtt: f64,
    pub jitter: f64,
    pub packet_loss: f64,
}

impl RouteStats {
    const WORST: RouteStats = RouteStats { rtt: 0.0, jitter: 0.0, packet_loss: 100.0 };
}

impl PingHistory {
    pub fn new() -> Self {
        PingHistory { entries: [Entry::EMPTY; PING_HISTORY_ENTRY_COUNT], next_sequence: 0 }
    }

    #[inline]
    fn index(sequence: u64) -> usize {
        (sequence % PING_HISTORY_ENTRY_COUNT as u64) as usize
    }

    /// Records a ping send, returning the sequence number assigned to it.
    pub fn ping_sent(&mut self, time_sent: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.entries[Self::index(sequence)] =
            Entry { sequence, time_sent, time_received_pong: NO_PONG };

        sequence
    }

    /// Records a pong. Ignored if the slot has since been overwritten by a later ping (stale
    /// match).
    pub fn pong_received(&mut self, sequence: u64, time_received: f64) {
        let entry = &mut self.entries[Self::index(sequence)];
        if entry.sequence == sequence {
            entry.time_received_pong = time_received;
        }
    }

    /// Computes RTT/jitter/packet-loss over `[start, end]`, re-clamped per the safety offset.
    pub fn route_stats(&self, start: f64, end: f64) -> RouteStats {
        let in_window = |e: &Entry| e.time_sent >= start && e.time_sent <= end;

        let max_pong_time = self
            .entries
            .iter()
            .filter(|e| in_window(e) && e.time_received_pong >= 0.0)
            .map(|e| e.time_received_pong)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a: f64| a.max(v))));

        let max_pong_time = match max_pong_time {
            Some(t) => t,
            None => return RouteStats::WORST,
        };

        let effective_end = (max_pong_time - SAFETY_SECONDS).min(end);
        let in_clamped_window = |e: &Entry| e.time_sent >= start && e.time_sent <= effective_end;

        let sent_count = self.entries.iter().filter(|e| in_clamped_window(e)).count();
        let pong_rtts: Vec<f64> = self
            .entries
            .iter()
            .filter(|e| in_clamped_window(e) && e.time_received_pong >= 0.0)
            .map(|e| (e.time_received_pong - e.time_sent) * 1000.0)
            .collect();

        if sent_count == 0 || pong_rtts.is_empty() {
            return RouteStats::WORST;
        }

        let min_rtt = pong_rtts.iter().cloned().fold(f64::INFINITY, f64::min);
        let packet_loss = 100.0 * (1.0 - (pong_rtts.len() as f64 / sent_count as f64));

        let variance: f64 = pong_rtts.iter().map(|rtt| (rtt - min_rtt).powi(2)).sum::<f64>()
            / pong_rtts.len() as f64;
        let jitter = variance.sqrt();

        RouteStats { rtt: min_rtt, jitter, packet_loss }
    }
}

impl Default for PingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_reports_worst_case() {
        let history = PingHistory::new();
        let stats = history.route_stats(0.0, 10.0);
        assert_eq!(stats, RouteStats::WORST);
    }

    #[test]
    fn perfect_responses_report_zero_loss() {
        let mut history = PingHistory::new();
        for i in 0..10 {
            let t = i as f64 * 0.1;
            let seq = history.ping_sent(t);
            history.pong_received(seq, t + 0.02);
        }

        let stats = history.route_stats(0.0, 10.0);
        assert!(stats.packet_loss < 1.0);
        assert!(stats.rtt > 0.0);
    }

    #[test]
    fn dropped_pongs_increase_loss() {
        let mut history = PingHistory::new();
        for i in 0..10 {
            let t = i as f64 * 0.1;
            let seq = history.ping_sent(t);
            if i % 2 == 0 {
                history.pong_received(seq, t + 0.02);
            }
        }

        let stats = history.route_stats(0.0, 10.0);
        assert!(stats.packet_loss > 0.0);
    }

    #[test]
    fn stale_pong_on_overwritten_slot_is_ignored() {
        let mut history = PingHistory::new();
        let first = history.ping_sent(0.0);
        // Overwrite the same ring slot with a new ping PING_HISTORY_ENTRY_COUNT later.
        let second = history.ping_sent(0.0);
        assert_ne!(first, second);
        let _ = history.ping_sent(1.0);

        // Wrap the ring around to collide with `first`'s slot, then deliver a late pong for it.
        for _ in 0..(PING_HISTORY_ENTRY_COUNT as u64 - 3) {
            history.ping_sent(2.0);
        }
        history.pong_received(first, 99.0);

        // The slot no longer belongs to `first`; the late pong must not have landed anywhere it
        // shouldn't, i.e. this must not panic and stats remain well-formed.
        let stats = history.route_stats(0.0, 200.0);
        assert!(stats.packet_loss >= 0.0);
    }
}
