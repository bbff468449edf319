//! Server-side session record. One per upgraded client; created on upgrade, destroyed on timeout
//! or explicit shutdown. Grounded in `next_session_entry_t`.

use crate::address::Address;
use crate::bandwidth::BandwidthLimiter;
use crate::control::ClientStatsReport;
use crate::filter;
use crate::header;
use crate::jitter::{JitterTracker, OutOfOrderTracker};
use crate::loss::LossTracker;
use crate::packet::SERVER_TO_CLIENT;
use crate::ping_history::PingHistory;
use crate::replay::ReplayProtection;
use flux::crypto::{KEY_SIZE, KX_PUBLIC_KEY_SIZE, KX_SECRET_KEY_SIZE};
use flux::shared::UserId;

/// Silence past this many seconds on the client-to-server path marks a session timed out.
pub const SESSION_TIMEOUT_SECONDS: f64 = 5.0;

#[derive(Debug, Clone)]
pub struct ServerRoute {
    pub session_key: [u8; KEY_SIZE],
    pub session_version: u8,
    pub expire_time: f64,
}

pub enum SessionState {
    Open,
    Closed,
    Errored,
}

pub struct Session {
    pub session_id: u64,
    pub session_version: u8,
    pub client_address: Address,
    pub user_id: UserId,

    pub current_route: Option<ServerRoute>,
    pub previous_route: Option<ServerRoute>,

    pub replay_protection: ReplayProtection,
    pub ping_history: PingHistory,
    pub bandwidth_up: BandwidthLimiter,
    pub bandwidth_down: BandwidthLimiter,
    pub loss: LossTracker,
    pub jitter: JitterTracker,
    pub out_of_order: OutOfOrderTracker,

    pub upgrade_time: f64,
    pub last_client_packet_time: f64,
    send_sequence: u64,
    state: SessionState,

    /// The server's half of the X25519 exchange sent in `UpgradeRequest`; consumed once the
    /// matching `UpgradeResponse` arrives and the per-session control key can be derived.
    pub kx_secret: [u8; KX_SECRET_KEY_SIZE],
    /// Random value echoed by `UpgradeResponse`, checked against what this session's
    /// `UpgradeRequest` actually carried before trusting the exchange.
    pub upgrade_token: [u8; 32],
    /// Per-session AEAD key for session-control packets (RouteUpdate/RouteAck/ClientStats/...),
    /// derived from the upgrade handshake. `None` until `UpgradeResponse` is processed.
    pub control_key: Option<[u8; KEY_SIZE]>,
    /// The client's route-token key, learned from `UpgradeResponse`; this is the key the backend
    /// must encrypt this client's hop of any route/continue token to.
    pub route_public: Option<[u8; KX_PUBLIC_KEY_SIZE]>,
    control_send_sequence: u64,
    pub control_replay: ReplayProtection,
    pub last_client_stats: Option<ClientStatsReport>,
}

impl Session {
    pub fn new(
        session_id: u64,
        client_address: Address,
        user_id: UserId,
        upgrade_time: f64,
        kbps_up: u32,
        kbps_down: u32,
        kx_secret: [u8; KX_SECRET_KEY_SIZE],
        upgrade_token: [u8; 32],
    ) -> Self {
        Session {
            session_id,
            session_version: 0,
            client_address,
            user_id,
            current_route: None,
            previous_route: None,
            replay_protection: ReplayProtection::new(),
            ping_history: PingHistory::new(),
            bandwidth_up: BandwidthLimiter::new(kbps_up),
            bandwidth_down: BandwidthLimiter::new(kbps_down),
            loss: LossTracker::new(),
            jitter: JitterTracker::new(),
            out_of_order: OutOfOrderTracker::new(),
            upgrade_time,
            last_client_packet_time: upgrade_time,
            send_sequence: 0,
            state: SessionState::Open,
            kx_secret,
            upgrade_token,
            control_key: None,
            route_public: None,
            control_send_sequence: 0,
            control_replay: ReplayProtection::new(),
            last_client_stats: None,
        }
    }

    /// Assigns and advances the session-control send sequence, used for RouteUpdate/ClientRelayUpdate.
    pub fn next_control_sequence(&mut self) -> u64 {
        let sequence = self.control_send_sequence;
        self.control_send_sequence += 1;
        sequence
    }

    /// Extends the current route's expiry by one slice (ContinueResponse accepted). No-op if
    /// there is no current route.
    pub fn extend_route(&mut self, amount: f64) {
        if let Some(route) = &mut self.current_route {
            route.expire_time += amount;
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    pub fn mark_errored(&mut self) {
        self.state = SessionState::Errored;
    }

    /// Installs a new current route and demotes the previous one. `session_version` is the value
    /// carried by the route token the backend minted for this hop, not a locally-incremented
    /// counter: the client's route manager trusts that same token's `session_version` field
    /// directly (see [`crate::token::RouteToken`]), so both sides must agree on the backend's
    /// canonical number rather than maintain independent counters that could drift apart.
    pub fn install_route(&mut self, session_key: [u8; KEY_SIZE], session_version: u8, expire_time: f64) {
        self.session_version = session_version;
        self.previous_route = self.current_route.take();
        self.current_route = Some(ServerRoute { session_key, session_version, expire_time });
    }

    pub fn clear_route(&mut self) {
        self.previous_route = self.current_route.take();
    }

    /// Tries current, then previous, route key to verify and decrypt an inbound client-to-server
    /// packet. `data` is the full gauntlet-verified datagram, filter prefix included. Replay
    /// protection is checked but not advanced here; the caller advances it only after the full
    /// business-logic checks pass.
    pub fn decode_client_to_server(&self, data: &[u8]) -> Option<(u64, Vec<u8>)> {
        if data.len() < filter::MIN_PACKET_BYTES {
            return None;
        }
        let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];

        for route in [&self.current_route, &self.previous_route].into_iter().flatten() {
            let mut payload = vec![0u8; inner.len().saturating_sub(header::HEADER_BYTES)];
            if let Some(fields) = header::read_sealed(
                inner,
                crate::packet::CLIENT_TO_SERVER,
                &mut payload,
                &route.session_key,
            ) {
                if fields.session_id == self.session_id
                    && fields.session_version == route.session_version
                    && !self.replay_protection.already_received(fields.sequence)
                {
                    return Some((fields.sequence, payload));
                }
            }
        }
        None
    }

    /// Frames `payload` as a server-to-client packet under the current route key, assigning and
    /// advancing the session's send sequence, and wraps it in filter framing keyed by `magic`.
    /// `server_address` is this hop's own address, used as both `from` and `to`: the receiving
    /// client always verifies against the server's address regardless of direction (§4.1).
    /// Returns `None` if there is no current route (the caller should send direct instead).
    pub fn encode_server_to_client(&mut self, payload: &[u8], magic: [u8; 8], server_address: Address) -> Option<Vec<u8>> {
        let route = self.current_route.as_ref()?;
        let sequence = self.send_sequence;
        self.send_sequence += 1;

        let mut body = vec![0u8; header::HEADER_BYTES + payload.len()];
        header::write_sealed(
            &mut body,
            SERVER_TO_CLIENT,
            sequence,
            self.session_id,
            self.session_version,
            payload,
            &route.session_key,
        );

        let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
        out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
        let len = out.len();
        filter::write_filter_prefix(&mut out, SERVER_TO_CLIENT, magic, server_address, server_address, len);
        Some(out)
    }

    /// Decodes an inbound `SessionPing` (current then previous route key) and builds the matching
    /// `SessionPong`, echoing the ping's own payload (its ping-history sequence) so the client can
    /// match the reply to the send. `server_address` frames the reply the same way as
    /// [`Self::encode_server_to_client`].
    pub fn reply_session_ping(&mut self, data: &[u8], magic: [u8; 8], server_address: Address) -> Option<Vec<u8>> {
        if data.len() < filter::MIN_PACKET_BYTES {
            return None;
        }
        let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];

        let mut decoded = None;
        for route in [&self.current_route, &self.previous_route].into_iter().flatten() {
            let mut payload = vec![0u8; inner.len().saturating_sub(header::HEADER_BYTES)];
            if let Some(fields) = header::read_sealed(inner, crate::packet::SESSION_PING, &mut payload, &route.session_key)
            {
                if fields.session_id == self.session_id && fields.session_version == route.session_version {
                    decoded = Some((route.session_key, route.session_version, payload));
                    break;
                }
            }
        }
        let (key, version, ping_payload) = decoded?;

        let sequence = self.send_sequence;
        self.send_sequence += 1;

        let mut body = vec![0u8; header::HEADER_BYTES + ping_payload.len()];
        header::write_sealed(&mut body, crate::packet::SESSION_PONG, sequence, self.session_id, version, &ping_payload, &key);

        let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
        out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
        let len = out.len();
        filter::write_filter_prefix(&mut out, crate::packet::SESSION_PONG, magic, server_address, server_address, len);
        Some(out)
    }

    pub fn is_timed_out(&self, now: f64) -> bool {
        now - self.last_client_packet_time > SESSION_TIMEOUT_SECONDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_session() -> Session {
        Session::new(1, "1.2.3.4:5".parse().unwrap(), 99, 0.0, 1000, 1000, [0u8; KX_SECRET_KEY_SIZE], [0u8; 32])
    }

    fn build_client_to_server(session_id: u64, session_version: u8, key: &[u8; KEY_SIZE]) -> Vec<u8> {
        let mut body = vec![0u8; header::HEADER_BYTES + 4];
        header::write_sealed(&mut body, crate::packet::CLIENT_TO_SERVER, 5, session_id, session_version, b"ping", key);

        let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
        out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
        let from: Address = "1.2.3.4:5".parse().unwrap();
        let to: Address = "9.9.9.9:9".parse().unwrap();
        let len = out.len();
        filter::write_filter_prefix(&mut out, crate::packet::CLIENT_TO_SERVER, [0; 8], from, to, len);
        out
    }

    #[test]
    fn fresh_session_starts_open() {
        let session = sample_session();
        assert!(matches!(session.state(), SessionState::Open));
    }

    #[test]
    fn install_route_adopts_the_tokens_session_version() {
        let mut session = sample_session();
        assert_eq!(session.session_version, 0);
        session.install_route([1u8; KEY_SIZE], 1, 10.0);
        assert_eq!(session.session_version, 1);
        session.install_route([2u8; KEY_SIZE], 5, 20.0);
        assert_eq!(session.session_version, 5);
    }

    #[test]
    fn client_to_server_round_trip() {
        let mut session = sample_session();
        session.install_route([7u8; KEY_SIZE], 1, 100.0);

        let route = session.current_route.as_ref().unwrap();
        let packet = build_client_to_server(session.session_id, session.session_version, &route.session_key);

        let (sequence, payload) = session.decode_client_to_server(&packet).unwrap();
        assert_eq!(sequence, 5);
        assert_eq!(&payload[..], b"ping");
    }

    #[test]
    fn previous_route_still_verifies_during_changeover() {
        let mut session = sample_session();
        session.install_route([7u8; KEY_SIZE], 1, 100.0);
        let old_route = session.current_route.clone().unwrap();

        session.install_route([8u8; KEY_SIZE], 2, 100.0); // supersedes; old route demoted to previous

        let packet = build_client_to_server(session.session_id, old_route.session_version, &old_route.session_key);

        let (sequence, payload) = session.decode_client_to_server(&packet).unwrap();
        assert_eq!(sequence, 5);
        assert_eq!(&payload[..], b"ping");
    }

    #[test]
    fn long_stale_version_outside_current_and_previous_is_rejected() {
        let mut session = sample_session();
        session.install_route([7u8; KEY_SIZE], 1, 100.0);
        session.install_route([8u8; KEY_SIZE], 2, 100.0);
        session.install_route([9u8; KEY_SIZE], 3, 100.0); // two generations superseded now

        // the very first route's version, no longer current or previous
        let packet = build_client_to_server(session.session_id, 1, &[7u8; KEY_SIZE]);

        assert!(session.decode_client_to_server(&packet).is_none());
    }

    #[test]
    fn timeout_after_silence() {
        let session = sample_session();
        assert!(!session.is_timed_out(1.0));
        assert!(session.is_timed_out(SESSION_TIMEOUT_SECONDS + 1.0));
    }
}
