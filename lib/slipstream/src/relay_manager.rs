//! Near-relay ping manager, shared shape on both endpoints. Grounded in `next_relay_manager.h`:
//! distributes initial ping times evenly across `1 / NEAR_RELAY_PINGS_PER_SECOND` to avoid a
//! thundering herd of simultaneous pings when a relay set is first installed.

use crate::address::Address;
use crate::ping_history::{PingHistory, RouteStats};

pub const NEAR_RELAY_PINGS_PER_SECOND: f64 = 10.0;
pub const MAX_NEAR_RELAYS: usize = 32;

#[derive(Debug, Clone)]
pub struct NearRelay {
    pub id: u64,
    pub address: Address,
    pub ping_token: [u8; 32],
    pub expire_timestamp: u64,
}

struct RelaySlot {
    relay: NearRelay,
    history: PingHistory,
    last_ping_time: f64,
    next_ping_time: f64,
}

pub struct RelayPingManager {
    slots: Vec<RelaySlot>,
    ping_interval: f64,
}

impl RelayPingManager {
    pub fn new() -> Self {
        RelayPingManager { slots: Vec::new(), ping_interval: 1.0 / NEAR_RELAY_PINGS_PER_SECOND }
    }

    /// Replaces the near-relay set, staggering each relay's first ping evenly across one ping
    /// interval so a fresh relay list doesn't cause a burst of simultaneous sends.
    pub fn set_relays(&mut self, relays: Vec<NearRelay>, now: f64) {
        let count = relays.len().min(MAX_NEAR_RELAYS);
        let stagger = if count > 0 { self.ping_interval / count as f64 } else { 0.0 };

        self.slots = relays
            .into_iter()
            .take(MAX_NEAR_RELAYS)
            .enumerate()
            .map(|(i, relay)| RelaySlot {
                relay,
                history: PingHistory::new(),
                last_ping_time: now,
                next_ping_time: now + stagger * i as f64,
            })
            .collect();
    }

    /// Returns `(sequence, relay_address, ping_token, expire_timestamp)` for every relay whose
    /// next scheduled ping has come due, and advances their schedule by one interval.
    pub fn pings_to_send(&mut self, now: f64) -> Vec<(u64, Address, [u8; 32], u64)> {
        let interval = self.ping_interval;
        let mut out = Vec::new();

        for slot in &mut self.slots {
            if now >= slot.next_ping_time {
                let sequence = slot.history.ping_sent(now);
                slot.last_ping_time = now;
                slot.next_ping_time = now + interval;
                out.push((sequence, slot.relay.address, slot.relay.ping_token, slot.relay.expire_timestamp));
            }
        }

        out
    }

    /// Matches an inbound pong by relay address and sequence, feeding the relay's ping history.
    pub fn pong_received(&mut self, from: Address, sequence: u64, now: f64) {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.relay.address == from) {
            slot.history.pong_received(sequence, now);
        }
    }

    pub fn route_stats(&self, relay_id: u64, start: f64, end: f64) -> Option<RouteStats> {
        self.slots
            .iter()
            .find(|s| s.relay.id == relay_id)
            .map(|s| s.history.route_stats(start, end))
    }

    pub fn relay_count(&self) -> usize {
        self.slots.len()
    }

    /// `(relay_id, RouteStats)` for every tracked relay over `[start, end]`, for `ClientStats`
    /// reporting (§4.7).
    pub fn stats_summary(&self, start: f64, end: f64) -> Vec<(u64, RouteStats)> {
        self.slots.iter().map(|s| (s.relay.id, s.history.route_stats(start, end))).collect()
    }
}

impl Default for RelayPingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay(id: u64, port: u16) -> NearRelay {
        NearRelay {
            id,
            address: format!("10.0.0.1:{}", port).parse().unwrap(),
            ping_token: [id as u8; 32],
            expire_timestamp: 9_999_999_999,
        }
    }

    #[test]
    fn staggers_first_pings_across_the_interval() {
        let mut manager = RelayPingManager::new();
        manager.set_relays(vec![relay(1, 1000), relay(2, 1001), relay(3, 1002), relay(4, 1003)], 0.0);

        // Nothing due at t=0 except the first relay, which is staggered to offset 0.
        let due_at_zero = manager.pings_to_send(0.0);
        assert_eq!(due_at_zero.len(), 1);

        // After a full interval every relay should have had its first ping sent.
        let due_later = manager.pings_to_send(1.0 / NEAR_RELAY_PINGS_PER_SECOND + 0.001);
        assert_eq!(due_later.len(), 3);
    }

    #[test]
    fn pong_feeds_the_right_relays_history() {
        let mut manager = RelayPingManager::new();
        manager.set_relays(vec![relay(1, 1000), relay(2, 1001)], 0.0);

        let pings = manager.pings_to_send(0.0);
        let (sequence, address, _, _) = pings[0];
        manager.pong_received(address, sequence, 0.05);

        let stats = manager.route_stats(1, 0.0, 1.0).unwrap();
        assert!(stats.rtt >= 0.0);
    }

    #[test]
    fn unknown_relay_id_reports_nothing() {
        let manager = RelayPingManager::new();
        assert!(manager.route_stats(999, 0.0, 1.0).is_none());
    }
}
