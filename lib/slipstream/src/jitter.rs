//! Streaming jitter and out-of-order trackers for ordinary payload traffic, independent from the
//! ping-history window stats in [`crate::ping_history`]. Grounded in the mean-absolute-deviation
//! jitter estimator described alongside `next_session_entry_t`'s stats fields.

/// Exponential smoothing factor applied each time a new inter-arrival delta is folded in.
const SMOOTHING: f64 = 1.0 / 16.0;

pub struct JitterTracker {
    last_receive_time: Option<f64>,
    last_sequence_time: Option<f64>,
    mean_jitter_ms: f64,
}

impl JitterTracker {
    pub fn new() -> Self {
        JitterTracker { last_receive_time: None, last_sequence_time: None, mean_jitter_ms: 0.0 }
    }

    /// Folds in a newly arrived packet's receive time and its expected (previous + one tick)
    /// arrival time, per RFC 3550's mean-absolute-deviation estimator.
    pub fn packet_received(&mut self, receive_time: f64, expected_interval: f64) {
        if let Some(last) = self.last_receive_time {
            let actual_interval = receive_time - last;
            let delta = (actual_interval - expected_interval).abs() * 1000.0;
            self.mean_jitter_ms += (delta - self.mean_jitter_ms) * SMOOTHING;
        }
        self.last_receive_time = Some(receive_time);
    }

    pub fn jitter_ms(&self) -> f64 {
        self.mean_jitter_ms
    }
}

impl Default for JitterTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts accepted sequences that arrived after a higher-numbered one already had.
pub struct OutOfOrderTracker {
    highest_sequence: Option<u64>,
    out_of_order_count: u64,
}

impl OutOfOrderTracker {
    pub fn new() -> Self {
        OutOfOrderTracker { highest_sequence: None, out_of_order_count: 0 }
    }

    pub fn packet_received(&mut self, sequence: u64) {
        match self.highest_sequence {
            Some(highest) if sequence < highest => self.out_of_order_count += 1,
            Some(highest) if sequence > highest => self.highest_sequence = Some(sequence),
            None => self.highest_sequence = Some(sequence),
            _ => {}
        }
    }

    pub fn count(&self) -> u64 {
        self.out_of_order_count
    }
}

impl Default for OutOfOrderTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_arrivals_produce_near_zero_jitter() {
        let mut tracker = JitterTracker::new();
        for i in 0..20 {
            tracker.packet_received(i as f64 * 0.1, 0.1);
        }
        assert!(tracker.jitter_ms() < 1.0);
    }

    #[test]
    fn irregular_arrivals_raise_jitter() {
        let mut tracker = JitterTracker::new();
        let mut t = 0.0;
        for i in 0..20 {
            let delta = if i % 2 == 0 { 0.05 } else { 0.15 };
            t += delta;
            tracker.packet_received(t, 0.1);
        }
        assert!(tracker.jitter_ms() > 1.0);
    }

    #[test]
    fn out_of_order_counts_regressions() {
        let mut tracker = OutOfOrderTracker::new();
        for seq in [0, 1, 2, 5, 4, 3, 6] {
            tracker.packet_received(seq);
        }
        assert_eq!(tracker.count(), 2);
    }
}
