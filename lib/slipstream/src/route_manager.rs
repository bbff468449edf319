//! Client-side route manager: owns pending/current/previous route state, the send sequence
//! counter and the sticky fallback-to-direct flag. Grounded in
//! `original_source/source/next_route_manager.cpp`; modeled as a single state enum rather than
//! the original's scattered booleans (see DESIGN.md).

use crate::address::Address;
use crate::filter;
use crate::header;
use crate::packet::{
    CLIENT_TO_SERVER, CONTINUE_REQUEST, CONTINUE_RESPONSE, ROUTE_REQUEST, ROUTE_RESPONSE,
    SERVER_TO_CLIENT, SESSION_PING, SESSION_PONG,
};
use crate::ping_history::{PingHistory, RouteStats};
use crate::token::{ContinueToken, RouteToken, MAX_TOKENS};
use flux::crypto::KEY_SIZE;

pub const SLICE_SECONDS: f64 = 10.0;
pub const ROUTE_REQUEST_SEND_TIME: f64 = 0.25;
pub const ROUTE_REQUEST_TIMEOUT: f64 = 5.0;
pub const CONTINUE_REQUEST_TIMEOUT: f64 = 5.0;
/// Session-ping cadence once a route is installed, matching the near-relay ping rate (§4.6/§4.7).
pub const SESSION_PING_SEND_TIME: f64 = 0.1;

/// Route-update type tags carried in the first byte of a decrypted `RouteUpdate` payload.
/// Grounded in `NEXT_UPDATE_TYPE_DIRECT/ROUTE/CONTINUE`.
pub const UPDATE_TYPE_DIRECT: u8 = 0;
pub const UPDATE_TYPE_ROUTE: u8 = 1;
pub const UPDATE_TYPE_CONTINUE: u8 = 2;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FallbackReason {
    BadRouteToken,
    BadContinueToken,
    RouteRequestTimedOut,
    ContinueRequestTimedOut,
    RouteExpired,
    RouteTimedOut,
    NoRouteToContinue,
    PreviousUpdateStillPending,
}

#[derive(Debug, Clone)]
struct ActiveRoute {
    session_id: u64,
    session_version: u8,
    next_address: Address,
    session_key: [u8; KEY_SIZE],
    expire_time: f64,
}

#[derive(Debug, Clone)]
struct PendingRoute {
    route: ActiveRoute,
    request_packet: Vec<u8>,
    start_time: f64,
    last_send_time: f64,
    superseding_current: bool,
}

#[derive(Debug, Clone)]
struct PendingContinue {
    request_packet: Vec<u8>,
    start_time: f64,
    last_send_time: f64,
}

enum RouteState {
    Direct,
    Pending(PendingRoute),
    OnRoute,
    PendingContinue(PendingContinue),
}

pub struct RouteManager {
    state: RouteState,
    current: Option<ActiveRoute>,
    previous: Option<ActiveRoute>,
    send_sequence: u64,
    fallback_to_direct: bool,
    fallback_reason: Option<FallbackReason>,
    ping_history: PingHistory,
    last_session_ping_time: f64,
}

impl RouteManager {
    pub fn new() -> Self {
        RouteManager {
            state: RouteState::Direct,
            current: None,
            previous: None,
            send_sequence: 0,
            fallback_to_direct: false,
            fallback_reason: None,
            ping_history: PingHistory::new(),
            last_session_ping_time: f64::NEG_INFINITY,
        }
    }

    pub fn is_on_route(&self) -> bool {
        matches!(self.state, RouteState::OnRoute) && self.current.is_some()
    }

    pub fn has_fallen_back(&self) -> bool {
        self.fallback_to_direct
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        self.fallback_reason
    }

    /// Decrypts the first of `encrypted_tokens` under `our_private_key` and stages a
    /// route-request carrying the remaining tokens verbatim to the next hop. Requires at least
    /// two tokens (ours plus at least one for the chain ahead); fewer is a malformed update and
    /// is ignored by the caller before this is reached.
    pub fn begin_next_route(
        &mut self,
        encrypted_tokens: &[Vec<u8>],
        our_private_key: &[u8; flux::crypto::XCHACHA_KEY_SIZE],
        magic: [u8; 8],
        now: f64,
        own_address: Address,
    ) -> bool {
        if encrypted_tokens.len() < 2 || encrypted_tokens.len() > MAX_TOKENS {
            return false;
        }

        let token = match RouteToken::decrypt(&encrypted_tokens[0], our_private_key) {
            Some(t) => t,
            None => {
                self.fallback_to_direct(FallbackReason::BadRouteToken);
                return false;
            }
        };

        let superseding_current = self.current.is_some();
        let request_packet =
            build_chained_request(ROUTE_REQUEST, magic, own_address, token.next_address, &encrypted_tokens[1..]);

        let route = ActiveRoute {
            session_id: token.session_id,
            session_version: token.session_version,
            next_address: token.next_address,
            session_key: token.session_private_key,
            expire_time: 0.0, // set on confirmation
        };

        self.state = RouteState::Pending(PendingRoute {
            route,
            request_packet,
            start_time: now,
            last_send_time: now,
            superseding_current,
        });

        true
    }

    /// Called when a route-update of type CONTINUE arrives. Requires a current route and no
    /// prior pending operation.
    pub fn continue_next_route(
        &mut self,
        encrypted_tokens: &[Vec<u8>],
        our_private_key: &[u8; flux::crypto::XCHACHA_KEY_SIZE],
        magic: [u8; 8],
        now: f64,
        own_address: Address,
    ) -> bool {
        if self.current.is_none() {
            self.fallback_to_direct(FallbackReason::NoRouteToContinue);
            return false;
        }
        if matches!(self.state, RouteState::Pending(_) | RouteState::PendingContinue(_)) {
            self.fallback_to_direct(FallbackReason::PreviousUpdateStillPending);
            return false;
        }
        if encrypted_tokens.is_empty() || encrypted_tokens.len() > MAX_TOKENS {
            return false;
        }

        if ContinueToken::decrypt(&encrypted_tokens[0], our_private_key).is_none() {
            self.fallback_to_direct(FallbackReason::BadContinueToken);
            return false;
        }

        // Safe: `self.current.is_none()` already returned above.
        let next_hop = self.current.as_ref().unwrap().next_address;
        let request_packet = build_chained_request(CONTINUE_REQUEST, magic, own_address, next_hop, &encrypted_tokens[1..]);

        self.state = RouteState::PendingContinue(PendingContinue {
            request_packet,
            start_time: now,
            last_send_time: now,
        });

        true
    }

    /// Called when a route-update of type DIRECT arrives: current becomes previous, current is
    /// cleared, and any pending operation is abandoned.
    pub fn direct_route(&mut self) {
        self.previous = self.current.take();
        self.state = RouteState::Direct;
    }

    /// Packets the caller should (re)send this tick, paired with their destination.
    pub fn packets_to_send(&mut self, now: f64) -> Vec<(Vec<u8>, Address)> {
        match &mut self.state {
            RouteState::Pending(pending) => {
                if now - pending.last_send_time >= ROUTE_REQUEST_SEND_TIME {
                    pending.last_send_time = now;
                    vec![(pending.request_packet.clone(), pending.route.next_address)]
                } else {
                    Vec::new()
                }
            }
            RouteState::PendingContinue(pending) => {
                if now - pending.last_send_time >= ROUTE_REQUEST_SEND_TIME {
                    pending.last_send_time = now;
                    let addr = self.current.as_ref().map(|c| c.next_address).unwrap_or_default();
                    vec![(pending.request_packet.clone(), addr)]
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Confirms a pending route install (RouteResponse received).
    pub fn confirm_pending_route(&mut self, now: f64) {
        if let RouteState::Pending(pending) = &self.state {
            let mut route = pending.route.clone();
            route.expire_time = if pending.superseding_current {
                self.current.as_ref().map(|c| c.expire_time).unwrap_or(now) + 2.0 * SLICE_SECONDS
            } else {
                pending.start_time + 2.0 * SLICE_SECONDS
            };

            self.previous = self.current.take();
            self.current = Some(route);
            self.state = RouteState::OnRoute;
        }
    }

    /// Confirms a pending continue (ContinueResponse received): extends expire by one slice.
    pub fn confirm_continue(&mut self) {
        if matches!(self.state, RouteState::PendingContinue(_)) {
            if let Some(current) = &mut self.current {
                current.expire_time += SLICE_SECONDS;
            }
            self.state = RouteState::OnRoute;
        }
    }

    /// Checks every deadline, falling back to direct as needed. `now` drives both request
    /// timeouts and route expiry.
    pub fn check_for_timeouts(&mut self, now: f64) {
        match &self.state {
            RouteState::Pending(pending) => {
                if now - pending.start_time > ROUTE_REQUEST_TIMEOUT {
                    self.fallback_to_direct(FallbackReason::RouteRequestTimedOut);
                }
            }
            RouteState::PendingContinue(pending) => {
                if now - pending.start_time > CONTINUE_REQUEST_TIMEOUT {
                    self.fallback_to_direct(FallbackReason::ContinueRequestTimedOut);
                }
            }
            RouteState::OnRoute => {
                if let Some(current) = &self.current {
                    if now > current.expire_time {
                        self.fallback_to_direct(FallbackReason::RouteExpired);
                    }
                }
            }
            RouteState::Direct => {}
        }
    }

    /// Wraps `payload` in a filter-prefixed client-to-server header and returns the next-hop
    /// address, if a current route is installed. Returns `None` if the caller should send direct
    /// instead.
    pub fn prepare_send_packet(
        &mut self,
        payload: &[u8],
        magic: [u8; 8],
        own_address: Address,
    ) -> Option<(Vec<u8>, Address)> {
        if self.fallback_to_direct {
            return None;
        }
        let current = self.current.as_ref()?;

        let sequence = self.send_sequence;
        self.send_sequence += 1;

        let mut body = vec![0u8; header::HEADER_BYTES + payload.len()];
        header::write_sealed(
            &mut body,
            CLIENT_TO_SERVER,
            sequence,
            current.session_id,
            current.session_version,
            payload,
            &current.session_key,
        );

        let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
        out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
        let len = out.len();
        filter::write_filter_prefix(&mut out, CLIENT_TO_SERVER, magic, own_address, current.next_address, len);

        Some((out, current.next_address))
    }

    /// Tries the current route key first, then the previous, to decrypt a server-to-client
    /// packet. `data` is the full gauntlet-verified datagram, filter framing included.
    pub fn process_server_to_client_packet(&self, data: &[u8]) -> Option<(u64, Vec<u8>)> {
        if data.len() < filter::MIN_PACKET_BYTES {
            return None;
        }
        let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];

        for route in [self.current.as_ref(), self.previous.as_ref()].into_iter().flatten() {
            let mut payload = vec![0u8; inner.len().saturating_sub(header::HEADER_BYTES)];
            if let Some(fields) =
                header::read_sealed(inner, SERVER_TO_CLIENT, &mut payload, &route.session_key)
            {
                if fields.session_id == route.session_id
                    && fields.session_version == route.session_version
                {
                    return Some((fields.sequence, payload));
                }
            }
        }
        None
    }

    /// Sends a session ping over the current route, if one is installed and the ping cadence has
    /// come due. Grounded in the near-relay ping manager's identical stagger/cadence idea (§4.6),
    /// applied here to the single end-to-end route instead of a set of relays.
    pub fn send_session_ping(&mut self, magic: [u8; 8], now: f64, own_address: Address) -> Option<(Vec<u8>, Address)> {
        if !self.is_on_route() || now - self.last_session_ping_time < SESSION_PING_SEND_TIME {
            return None;
        }
        let current = self.current.as_ref()?;
        self.last_session_ping_time = now;

        let ping_sequence = self.ping_history.ping_sent(now);
        let sequence = self.send_sequence;
        self.send_sequence += 1;
        let payload = ping_sequence.to_be_bytes();

        let mut body = vec![0u8; header::HEADER_BYTES + payload.len()];
        header::write_sealed(
            &mut body,
            SESSION_PING,
            sequence,
            current.session_id,
            current.session_version,
            &payload,
            &current.session_key,
        );

        let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
        out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
        let len = out.len();
        filter::write_filter_prefix(&mut out, SESSION_PING, magic, own_address, current.next_address, len);

        Some((out, current.next_address))
    }

    /// Feeds an inbound `SessionPong` into the ping history, trying current then previous route.
    /// `data` is the full gauntlet-verified datagram, filter framing included.
    pub fn receive_session_pong(&mut self, data: &[u8], now: f64) -> bool {
        if data.len() < filter::MIN_PACKET_BYTES {
            return false;
        }
        let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];

        let mut found_sequence = None;
        for route in [self.current.as_ref(), self.previous.as_ref()].into_iter().flatten() {
            let mut payload = vec![0u8; inner.len().saturating_sub(header::HEADER_BYTES)];
            if let Some(fields) = header::read_sealed(inner, SESSION_PONG, &mut payload, &route.session_key) {
                if fields.session_id == route.session_id
                    && fields.session_version == route.session_version
                    && payload.len() == 8
                {
                    found_sequence = Some(u64::from_be_bytes(payload.try_into().unwrap()));
                    break;
                }
            }
        }

        match found_sequence {
            Some(seq) => {
                self.ping_history.pong_received(seq, now);
                true
            }
            None => false,
        }
    }

    /// Path quality over the last slice, for reporting via `ClientStats` (§4.7).
    pub fn route_stats(&self, now: f64) -> RouteStats {
        self.ping_history.route_stats(now - SLICE_SECONDS, now)
    }

    /// Verifies a `RouteResponse` datagram against the pending route's key (the current route may
    /// not exist yet) and, on success, confirms the install. `data` is the full gauntlet-verified
    /// datagram, filter framing included.
    pub fn confirm_pending_route_from_packet(&mut self, data: &[u8], now: f64) -> bool {
        let pending = match &self.state {
            RouteState::Pending(pending) => pending,
            _ => return false,
        };
        if data.len() < filter::MIN_PACKET_BYTES + header::HEADER_BYTES {
            return false;
        }
        let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];
        let mut payload = vec![0u8; inner.len() - header::HEADER_BYTES];
        let fields = match header::read_sealed(inner, ROUTE_RESPONSE, &mut payload, &pending.route.session_key) {
            Some(fields) => fields,
            None => return false,
        };
        if fields.session_id != pending.route.session_id || fields.session_version != pending.route.session_version {
            return false;
        }

        self.confirm_pending_route(now);
        true
    }

    /// Verifies a `ContinueResponse` datagram against the current route's key and, on success,
    /// confirms the continue. `data` is the full gauntlet-verified datagram, filter framing
    /// included.
    pub fn confirm_continue_from_packet(&mut self, data: &[u8]) -> bool {
        if !matches!(self.state, RouteState::PendingContinue(_)) {
            return false;
        }
        let current = match &self.current {
            Some(current) => current,
            None => return false,
        };
        if data.len() < filter::MIN_PACKET_BYTES + header::HEADER_BYTES {
            return false;
        }
        let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];
        let mut payload = vec![0u8; inner.len() - header::HEADER_BYTES];
        let fields = match header::read_sealed(inner, CONTINUE_RESPONSE, &mut payload, &current.session_key) {
            Some(fields) => fields,
            None => return false,
        };
        if fields.session_id != current.session_id || fields.session_version != current.session_version {
            return false;
        }

        self.confirm_continue();
        true
    }

    /// Records the failure, promotes current to previous, clears current, and sets the sticky
    /// fallback bit. Idempotent: the reason is recorded only the first time.
    pub fn fallback_to_direct(&mut self, reason: FallbackReason) {
        if self.fallback_to_direct {
            return;
        }

        self.fallback_to_direct = true;
        self.fallback_reason = Some(reason);
        self.previous = self.current.take();
        self.state = RouteState::Direct;
    }
}

impl Default for RouteManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a filter-framed route/continue-request datagram carrying whatever tokens remain in the
/// chain after this hop's own has been peeled off. `from`/`to` are the real address pair the next
/// hop will use to verify it: this hop's own address and the next hop's address (the next hop
/// being the server in this core's single-hop routing, see `ActiveRoute::next_address`).
pub fn build_chained_request(
    packet_type: u8,
    magic: [u8; 8],
    from: Address,
    to: Address,
    remaining_tokens: &[Vec<u8>],
) -> Vec<u8> {
    let mut body = vec![remaining_tokens.len() as u8];
    for token in remaining_tokens {
        body.extend_from_slice(&(token.len() as u16).to_be_bytes());
        body.extend_from_slice(token);
    }

    let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
    out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
    let len = out.len();
    filter::write_filter_prefix(&mut out, packet_type, magic, from, to, len);
    out
}

/// Parses a chained request's body (the bytes between the filter header and the trailing pittle):
/// `num_tokens(1) | (len_u16|bytes)*`.
pub fn parse_chained_request(data: &[u8]) -> Option<Vec<Vec<u8>>> {
    if data.len() < filter::MIN_PACKET_BYTES + 1 {
        return None;
    }
    let body = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];
    let num_tokens = body[0] as usize;
    let mut offset = 1;
    let mut tokens = Vec::with_capacity(num_tokens);
    for _ in 0..num_tokens {
        if body.len() < offset + 2 {
            return None;
        }
        let len = u16::from_be_bytes(body[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if body.len() < offset + len {
            return None;
        }
        tokens.push(body[offset..offset + len].to_vec());
        offset += len;
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::SESSION_PRIVATE_KEY_SIZE;

    fn own_addr() -> Address {
        "9.9.9.9:9000".parse().unwrap()
    }

    fn sample_tokens(key: &[u8; flux::crypto::XCHACHA_KEY_SIZE]) -> Vec<Vec<u8>> {
        let token = RouteToken {
            session_private_key: [1u8; SESSION_PRIVATE_KEY_SIZE],
            expire_timestamp: 1_700_000_000,
            session_id: 42,
            kbps_up: 100,
            kbps_down: 100,
            next_address: "10.0.0.1:40000".parse().unwrap(),
            prev_address: Address::None,
            session_version: 1,
            next_internal: false,
            prev_internal: false,
        };
        let encrypted = token.encrypt(key).to_vec();
        vec![encrypted, vec![0u8; 151]]
    }

    #[test]
    fn begin_next_route_requires_at_least_two_tokens() {
        let key = [9u8; flux::crypto::XCHACHA_KEY_SIZE];
        let mut manager = RouteManager::new();
        assert!(!manager.begin_next_route(&[vec![0u8; 151]], &key, [0; 8], 0.0, own_addr()));
    }

    #[test]
    fn confirmed_route_expires_at_install_plus_two_slices() {
        let key = [9u8; flux::crypto::XCHACHA_KEY_SIZE];
        let mut manager = RouteManager::new();
        assert!(manager.begin_next_route(&sample_tokens(&key), &key, [0; 8], 100.0, own_addr()));
        manager.confirm_pending_route(100.0);
        assert!(manager.is_on_route());
        assert_eq!(manager.current.as_ref().unwrap().expire_time, 100.0 + 2.0 * SLICE_SECONDS);
    }

    #[test]
    fn continue_extends_expire_by_one_slice() {
        let key = [9u8; flux::crypto::XCHACHA_KEY_SIZE];
        let mut manager = RouteManager::new();
        manager.begin_next_route(&sample_tokens(&key), &key, [0; 8], 0.0, own_addr());
        manager.confirm_pending_route(0.0);
        let before = manager.current.as_ref().unwrap().expire_time;

        let continue_token = ContinueToken { expire_timestamp: 999, session_id: 42, session_version: 1 };
        let tokens = vec![continue_token.encrypt(&key).to_vec(), vec![0u8; 57]];
        assert!(manager.continue_next_route(&tokens, &key, [0; 8], 1.0, own_addr()));
        manager.confirm_continue();

        assert_eq!(manager.current.as_ref().unwrap().expire_time, before + SLICE_SECONDS);
    }

    #[test]
    fn route_request_timeout_falls_back_to_direct() {
        let key = [9u8; flux::crypto::XCHACHA_KEY_SIZE];
        let mut manager = RouteManager::new();
        manager.begin_next_route(&sample_tokens(&key), &key, [0; 8], 0.0, own_addr());
        manager.check_for_timeouts(ROUTE_REQUEST_TIMEOUT + 1.0);

        assert!(manager.has_fallen_back());
        assert_eq!(manager.fallback_reason(), Some(FallbackReason::RouteRequestTimedOut));
        assert!(manager.prepare_send_packet(b"payload", [0; 8], own_addr()).is_none());
    }

    #[test]
    fn fallback_is_sticky_and_records_first_reason_only() {
        let mut manager = RouteManager::new();
        manager.fallback_to_direct(FallbackReason::RouteExpired);
        manager.fallback_to_direct(FallbackReason::RouteTimedOut);
        assert_eq!(manager.fallback_reason(), Some(FallbackReason::RouteExpired));
    }

    #[test]
    fn continue_without_current_route_falls_back() {
        let key = [9u8; flux::crypto::XCHACHA_KEY_SIZE];
        let mut manager = RouteManager::new();
        let tokens = vec![vec![0u8; 151], vec![0u8; 151]];
        assert!(!manager.continue_next_route(&tokens, &key, [0; 8], 0.0, own_addr()));
        assert_eq!(manager.fallback_reason(), Some(FallbackReason::NoRouteToContinue));
    }
}
