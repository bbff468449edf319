//! Server endpoint: owns the UDP socket and receive thread, a slab of upgraded sessions keyed by
//! client address, the near-relay ping manager, and backend scheduling. Grounded in the same
//! `neutronium::net::endpoint::Endpoint` IO/state split as [`crate::client::ClientEndpoint`].

use crate::address::Address;
use crate::backend::{BackendClient, RouteDecision};
use crate::control::{self, UPDATE_TYPE_CONTINUE, UPDATE_TYPE_DIRECT, UPDATE_TYPE_ROUTE};
use crate::filter;
use crate::header;
use crate::magic::MagicValues;
use crate::packet::{self, PacketType};
use crate::queue::RawPacketQueue;
use crate::relay_manager::RelayPingManager;
use crate::session::Session;
use crate::token::{ContinueToken, RouteToken};
use flux::crypto::{
    self, KEY_SIZE, KX_PUBLIC_KEY_SIZE, SIGN_SECRET_KEY_SIZE, SIGNATURE_SIZE, XCHACHA_KEY_SIZE,
};
use flux::shared::{ErrorType, NetworkError, NetworkResult, UserId};
use hashbrown::HashMap;
use slog::{info, o, Logger};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use crate::MAX_PACKET_BYTES;

/// Backend session updates are scheduled every slice (§4.5).
pub const BACKEND_UPDATE_INTERVAL: f64 = crate::SLICE_SECONDS;

/// Session-control packets never rotate a version; see the identical constant in `client.rs`.
const CONTROL_SESSION_VERSION: u8 = 0;

pub struct ServerEndpoint {
    socket: Arc<UdpSocket>,
    queue: Arc<RawPacketQueue>,
    shutdown: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,

    magic: MagicValues,
    relay_manager: RelayPingManager,
    backend: Box<dyn BackendClient + Send>,

    sessions_by_address: HashMap<Address, u64>,
    sessions: HashMap<u64, Session>,
    next_session_id: u64,

    buyer_secret_key: [u8; SIGN_SECRET_KEY_SIZE],
    /// This hop's own route/continue-token decryption key. See the matching note on
    /// `ClientEndpoint::session_key` in `client.rs`/DESIGN.md for why it is a stand-in for a
    /// backend-provisioned per-hop key rather than a distinct secret.
    route_private_key: [u8; XCHACHA_KEY_SIZE],

    public_address: Address,
    last_backend_update: f64,

    logger: Logger,
}

/// A decoded application payload, delivered by `update()` alongside the client address it
/// originated from (not any relay it happened to transit).
pub struct DeliveredPayload {
    pub client_address: Address,
    pub bytes: Vec<u8>,
}

impl ServerEndpoint {
    pub fn create(
        bind_address: &str,
        public_address: Address,
        buyer_secret_key: [u8; SIGN_SECRET_KEY_SIZE],
        backend: Box<dyn BackendClient + Send>,
        logger: Logger,
    ) -> NetworkResult<Self> {
        let socket = UdpSocket::bind(bind_address)?;
        let socket = Arc::new(socket);

        let queue = Arc::new(RawPacketQueue::new(8192));
        let shutdown = Arc::new(AtomicBool::new(false));
        let receiver =
            crate::client::spawn_receiver(Arc::clone(&socket), Arc::clone(&queue), Arc::clone(&shutdown));

        let mut route_private_key = [0u8; XCHACHA_KEY_SIZE];
        crypto::random_bytes(&mut route_private_key);

        Ok(ServerEndpoint {
            socket,
            queue,
            shutdown,
            receiver: Some(receiver),
            magic: MagicValues::new(),
            relay_manager: RelayPingManager::new(),
            backend,
            sessions_by_address: HashMap::new(),
            sessions: HashMap::new(),
            next_session_id: 1,
            buyer_secret_key,
            route_private_key,
            public_address,
            last_backend_update: 0.0,
            logger: logger.new(o!("component" => "server_endpoint")),
        })
    }

    /// Upgrades a previously-direct client: assigns a session id, sends a signed UpgradeRequest
    /// carrying a fresh X25519 public key.
    pub fn upgrade_session(&mut self, addr: Address, user_id: UserId, now: f64) -> NetworkResult<u64> {
        let session_id = self.next_session_id;
        self.next_session_id += 1;

        let (kx_public, kx_secret) = crypto::kx_keypair();
        let (packet, upgrade_token) =
            build_upgrade_request(session_id, &kx_public, &self.buyer_secret_key);

        let session = Session::new(session_id, addr, user_id, now, 0, 0, kx_secret, upgrade_token);
        self.sessions.insert(session_id, session);
        self.sessions_by_address.insert(addr, session_id);

        self.send_to(&packet, addr)?;

        info!(self.logger, "upgrading session"; "session_id" => session_id, "addr" => %addr);
        Ok(session_id)
    }

    /// Sends `bytes` to the client owning `session_id` if it has a current route, otherwise
    /// direct to its last-known address.
    pub fn send_packet(&mut self, session_id: u64, bytes: &[u8]) -> NetworkResult<()> {
        if bytes.len() > MAX_PACKET_BYTES {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }

        let magic = self.magic.current;
        let public_address = self.public_address;
        let (packet, addr) = match self.sessions.get_mut(&session_id) {
            Some(session) => {
                let client_address = session.client_address;
                match session.encode_server_to_client(bytes, magic, public_address) {
                    Some(p) => (p, client_address),
                    None => {
                        // No route installed yet: fall back to a cleartext Direct packet, same
                        // wire shape the client itself uses before its own route comes up. The
                        // client's Direct handler doesn't validate these sequence fields, so a
                        // server reply doesn't need to track them either.
                        let packet = crate::client::build_direct_packet(
                            magic,
                            public_address,
                            public_address,
                            0,
                            0,
                            bytes,
                        );
                        (packet, client_address)
                    }
                }
            }
            None => return Ok(()),
        };

        self.send_to(&packet, addr)
    }

    fn send_to(&self, packet: &[u8], to: Address) -> NetworkResult<()> {
        let addr = to.to_socket_addr().ok_or(NetworkError::Fatal(ErrorType::AddrParse))?;
        self.socket.send_to(packet, addr)?;
        Ok(())
    }

    /// Drains inbound, runs per-session timeouts, and schedules backend session updates once per
    /// slice.
    pub fn update(&mut self, now: f64) -> Vec<DeliveredPayload> {
        let mut delivered = Vec::new();

        for (from, bytes) in self.queue.drain() {
            if let Some(payload) = self.process_inbound(from, &bytes, now) {
                delivered.push(payload);
            }
        }

        self.poll_backend_updates(now);

        self.sessions.retain(|_, session| !session.is_timed_out(now));
        self.sessions_by_address.retain(|_, id| self.sessions.contains_key(id));

        if now - self.last_backend_update >= BACKEND_UPDATE_INTERVAL {
            self.last_backend_update = now;
            for (&session_id, session) in self.sessions.iter() {
                self.backend.request_session_update(session_id, session.user_id, session.client_address);
            }
        }

        delivered
    }

    /// Forwards whatever the backend decided for each upgraded session as a `RouteUpdate`. The
    /// server never installs the route itself here — it only forwards the token chain; the actual
    /// install happens when the resulting `RouteRequest`/`ContinueRequest` arrives back at
    /// [`Self::handle_route_request`]/[`Self::handle_continue_request`] (§4.2).
    fn poll_backend_updates(&mut self, now: f64) {
        let session_ids: Vec<u64> = self.sessions.keys().copied().collect();
        for session_id in session_ids {
            if let Some(response) = self.backend.poll_session_response(session_id) {
                self.apply_backend_response(session_id, response, now);
            }
        }
    }

    fn apply_backend_response(&mut self, session_id: u64, response: crate::backend::SessionUpdateResponse, _now: f64) {
        let magic = self.magic;
        let (client_address, key) = match self.sessions.get(&session_id) {
            Some(session) => match session.control_key {
                Some(key) => (session.client_address, key),
                None => return,
            },
            None => return,
        };

        let update_type = match response.decision {
            RouteDecision::Direct => {
                self.sessions.get_mut(&session_id).unwrap().clear_route();
                UPDATE_TYPE_DIRECT
            }
            RouteDecision::Route => UPDATE_TYPE_ROUTE,
            RouteDecision::Continue => UPDATE_TYPE_CONTINUE,
        };
        let payload = control::encode_route_update(update_type, &magic, &response.tokens);
        let sequence = self.sessions.get_mut(&session_id).unwrap().next_control_sequence();
        let packet = control::build_sealed(
            packet::ROUTE_UPDATE,
            magic.current,
            sequence,
            session_id,
            CONTROL_SESSION_VERSION,
            &payload,
            &key,
            self.public_address,
            self.public_address,
        );
        let _ = self.send_to(&packet, client_address);

        if !response.near_relays.is_empty() {
            self.send_relay_update(session_id, &response.near_relays);
        }
    }

    /// Pushes a fresh near-relay set to one session's client over the control channel (§4.6).
    fn send_relay_update(&mut self, session_id: u64, relays: &[crate::relay_manager::NearRelay]) {
        let magic = self.magic.current;
        let (client_address, key) = match self.sessions.get(&session_id) {
            Some(session) => match session.control_key {
                Some(key) => (session.client_address, key),
                None => return,
            },
            None => return,
        };

        let payload = control::encode_relay_update(relays);
        let sequence = self.sessions.get_mut(&session_id).unwrap().next_control_sequence();
        let packet = control::build_sealed(
            packet::CLIENT_RELAY_UPDATE,
            magic,
            sequence,
            session_id,
            CONTROL_SESSION_VERSION,
            &payload,
            &key,
            self.public_address,
            self.public_address,
        );
        let _ = self.send_to(&packet, client_address);
    }

    fn process_inbound(&mut self, from: Address, data: &[u8], now: f64) -> Option<DeliveredPayload> {
        if !filter::run_gauntlet(data, &self.magic, from, self.public_address) {
            return None;
        }

        match PacketType::from_byte(data[0]) {
            PacketType::ClientToServer => {
                let session_id = *self.sessions_by_address.get(&from)?;
                let session = self.sessions.get_mut(&session_id)?;
                let (sequence, payload) = session.decode_client_to_server(data)?;
                session.replay_protection.advance(sequence);
                session.last_client_packet_time = now;
                session.loss.packet_received(sequence);
                Some(DeliveredPayload { client_address: from, bytes: payload })
            }
            PacketType::Direct => {
                if data.len() < crate::client::DIRECT_HEADER_BYTES + filter::PITTLE_BYTES {
                    return None;
                }
                let payload =
                    data[crate::client::DIRECT_HEADER_BYTES..data.len() - filter::PITTLE_BYTES].to_vec();
                Some(DeliveredPayload { client_address: from, bytes: payload })
            }
            PacketType::ClientPing => {
                self.relay_manager.pong_received(
                    from,
                    u64::from_be_bytes(data[18..26].try_into().unwrap_or([0; 8])),
                    now,
                );
                None
            }
            PacketType::UpgradeResponse => {
                self.handle_upgrade_response(from, data);
                None
            }
            PacketType::RouteRequest => {
                self.handle_route_request(from, data, now);
                None
            }
            PacketType::ContinueRequest => {
                self.handle_continue_request(from, data, now);
                None
            }
            PacketType::SessionPing => {
                self.handle_session_ping(from, data);
                None
            }
            PacketType::RouteAck | PacketType::ClientRelayAck => {
                // No further state change: these simply confirm the client applied an update we
                // already sent. Session-control replay protection still guards against duplicates.
                let session_id = *self.sessions_by_address.get(&from)?;
                let session = self.sessions.get_mut(&session_id)?;
                if let Some(key) = session.control_key {
                    let packet_type = PacketType::from_byte(data[0]).to_byte();
                    if let Some((fields, _)) = control::read_sealed(data, packet_type, &key) {
                        session.control_replay.advance(fields.sequence);
                    }
                }
                None
            }
            PacketType::ClientStats => {
                self.handle_client_stats(from, data);
                None
            }
            _ => None,
        }
    }

    /// `type(1) | session_id(8) | client_kx_pub(32) | route_pub(32) | platform_id(1) |
    /// connection_type(1) | upgrade_token(32)`. Completes the upgrade handshake: verifies the
    /// echoed token, derives the per-session control key, and replies with a signed
    /// `UpgradeConfirm`.
    fn handle_upgrade_response(&mut self, from: Address, data: &[u8]) {
        const FIXED_LEN: usize = 1 + 8 + KX_PUBLIC_KEY_SIZE + KX_PUBLIC_KEY_SIZE + 1 + 1 + 32;
        if data.len() != FIXED_LEN {
            return;
        }

        let session_id = u64::from_be_bytes(data[1..9].try_into().unwrap());
        let mut client_kx_pub = [0u8; KX_PUBLIC_KEY_SIZE];
        client_kx_pub.copy_from_slice(&data[9..9 + KX_PUBLIC_KEY_SIZE]);
        let mut route_pub = [0u8; KX_PUBLIC_KEY_SIZE];
        route_pub.copy_from_slice(&data[9 + KX_PUBLIC_KEY_SIZE..9 + 2 * KX_PUBLIC_KEY_SIZE]);
        let upgrade_token = &data[9 + 2 * KX_PUBLIC_KEY_SIZE + 2..9 + 2 * KX_PUBLIC_KEY_SIZE + 2 + 32];

        let session = match self.sessions.get_mut(&session_id) {
            Some(s) => s,
            None => return,
        };
        if session.upgrade_token != upgrade_token {
            return;
        }
        let control_key = match crypto::kx_shared_key(&session.kx_secret, &client_kx_pub) {
            Some(key) => key,
            None => return,
        };
        session.control_key = Some(control_key);
        session.route_public = Some(route_pub);

        let confirm = build_upgrade_confirm(session_id, &self.buyer_secret_key);
        let _ = self.send_to(&confirm, from);

        info!(self.logger, "upgrade confirmed"; "session_id" => session_id);
    }

    /// Peels the token meant for this hop off a forwarded `RouteRequest` and, as the terminal hop,
    /// installs the route and replies with a `RouteResponse`. Grounded in §4.2's route-install
    /// round trip: the server never eagerly installs the route from a `SessionUpdateResponse`, only
    /// once the client's `RouteRequest` actually arrives back here.
    fn handle_route_request(&mut self, from: Address, data: &[u8], now: f64) {
        let tokens = match crate::route_manager::parse_chained_request(data) {
            Some(t) if t.len() == 1 => t,
            _ => return,
        };
        let token = match RouteToken::decrypt(&tokens[0], &self.route_private_key) {
            Some(t) => t,
            None => return,
        };

        let magic = self.magic.current;
        let session = match self.sessions.get_mut(&token.session_id) {
            Some(s) => s,
            None => return,
        };
        session.install_route(token.session_private_key, token.session_version, now + 2.0 * crate::SLICE_SECONDS);

        let reply = build_route_reply(
            packet::ROUTE_RESPONSE,
            magic,
            self.public_address,
            token.session_id,
            token.session_version,
            &token.session_private_key,
        );
        let _ = self.send_to(&reply, from);
    }

    /// Mirrors [`Self::handle_route_request`] for `ContinueRequest`: extends the existing route's
    /// expiry rather than installing a new one, since a continue token carries no new session key.
    fn handle_continue_request(&mut self, from: Address, data: &[u8], _now: f64) {
        let tokens = match crate::route_manager::parse_chained_request(data) {
            Some(t) if t.len() == 1 => t,
            _ => return,
        };
        let token = match ContinueToken::decrypt(&tokens[0], &self.route_private_key) {
            Some(t) => t,
            None => return,
        };

        let magic = self.magic.current;
        let session = match self.sessions.get_mut(&token.session_id) {
            Some(s) => s,
            None => return,
        };
        let route = match &session.current_route {
            Some(route) if route.session_version == token.session_version => route.clone(),
            _ => return,
        };
        session.extend_route(crate::SLICE_SECONDS);

        let reply = build_route_reply(
            packet::CONTINUE_RESPONSE,
            magic,
            self.public_address,
            token.session_id,
            token.session_version,
            &route.session_key,
        );
        let _ = self.send_to(&reply, from);
    }

    fn handle_session_ping(&mut self, from: Address, data: &[u8]) {
        let magic = self.magic.current;
        let public_address = self.public_address;
        let session_id = match self.sessions_by_address.get(&from) {
            Some(&id) => id,
            None => return,
        };
        let pong = match self.sessions.get_mut(&session_id) {
            Some(session) => session.reply_session_ping(data, magic, public_address),
            None => return,
        };
        if let Some(pong) = pong {
            let _ = self.send_to(&pong, from);
        }
    }

    fn handle_client_stats(&mut self, from: Address, data: &[u8]) {
        let session_id = match self.sessions_by_address.get(&from) {
            Some(&id) => id,
            None => return,
        };
        let session = match self.sessions.get_mut(&session_id) {
            Some(s) => s,
            None => return,
        };
        let key = match session.control_key {
            Some(key) => key,
            None => return,
        };
        let (fields, payload) = match control::read_sealed(data, packet::CLIENT_STATS, &key) {
            Some(v) => v,
            None => return,
        };
        if session.control_replay.already_received(fields.sequence) {
            return;
        }
        if let Some(report) = control::decode_client_stats(&payload) {
            session.control_replay.advance(fields.sequence);
            session.last_client_stats = Some(report);
        }
    }

    /// The session id already assigned to `addr`, if any. Host applications use this to decide
    /// whether an inbound address still needs `upgrade_session`.
    pub fn session_id_for(&self, addr: Address) -> Option<u64> {
        self.sessions_by_address.get(&addr).copied()
    }

    /// Most recently received `ClientStats` report for a session, for host-application telemetry.
    pub fn session_stats(&self, session_id: u64) -> Option<control::ClientStatsReport> {
        self.sessions.get(&session_id)?.last_client_stats.clone()
    }

    /// Whether a route is currently installed for a session.
    pub fn session_is_on_route(&self, session_id: u64) -> bool {
        self.sessions.get(&session_id).map(|s| s.current_route.is_some()).unwrap_or(false)
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Sends queued final backend session updates with a timeout, used on shutdown.
    pub fn flush(&mut self) {
        for (&session_id, session) in self.sessions.iter() {
            self.backend.request_session_update(session_id, session.user_id, session.client_address);
        }
    }

    pub fn destroy(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(addr) = self.socket.local_addr() {
            let _ = self.socket.send_to(&[0u8], addr);
        }
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

/// Builds a signed `UpgradeRequest` and returns it alongside the random `upgrade_token` it embeds,
/// so the caller can stash the token on the new `Session` and later verify it is echoed back by
/// `UpgradeResponse`.
fn build_upgrade_request(
    session_id: u64,
    server_kx_pub: &[u8; KX_PUBLIC_KEY_SIZE],
    buyer_secret_key: &[u8; SIGN_SECRET_KEY_SIZE],
) -> (Vec<u8>, [u8; 32]) {
    let mut out = vec![packet::UPGRADE_REQUEST];
    out.extend_from_slice(&session_id.to_be_bytes());
    out.extend_from_slice(server_kx_pub);

    let mut upgrade_token = [0u8; 32];
    crypto::random_bytes(&mut upgrade_token);
    out.extend_from_slice(&upgrade_token);

    let signature = crypto::sign_detached(&out[1..], buyer_secret_key);
    out.extend_from_slice(&signature);

    debug_assert_eq!(out.len(), 1 + 8 + KX_PUBLIC_KEY_SIZE + 32 + SIGNATURE_SIZE);
    (out, upgrade_token)
}

/// Builds a signed `UpgradeConfirm`: `type(1) | session_id(8) | signature(64)`, signed over
/// `type ‖ session_id`, matching [`crate::client::ClientEndpoint::handle_upgrade_confirm`].
fn build_upgrade_confirm(session_id: u64, buyer_secret_key: &[u8; SIGN_SECRET_KEY_SIZE]) -> Vec<u8> {
    let mut out = vec![packet::UPGRADE_CONFIRM];
    out.extend_from_slice(&session_id.to_be_bytes());
    let signature = crypto::sign_detached(&out, buyer_secret_key);
    out.extend_from_slice(&signature);
    out
}

/// Seals an empty-payload route/continue reply (`ROUTE_RESPONSE`/`CONTINUE_RESPONSE`) under a
/// just-installed route's session key, mirroring [`crate::session::Session::encode_server_to_client`]
/// but addressed by an explicit key/version pair rather than `self.current_route`, since the reply
/// must go out keyed by the *route* the request just installed or extended, which may already have
/// been superseded again by the time this returns.
fn build_route_reply(
    packet_type: u8,
    magic: [u8; 8],
    own_address: Address,
    session_id: u64,
    session_version: u8,
    session_key: &[u8; KEY_SIZE],
) -> Vec<u8> {
    let mut body = vec![0u8; header::HEADER_BYTES];
    header::write_sealed(&mut body, packet_type, 0, session_id, session_version, &[], session_key);

    let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
    out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
    let len = out.len();
    filter::write_filter_prefix(&mut out, packet_type, magic, own_address, own_address, len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_request_wire_layout_is_signed_over_the_right_range() {
        let (_public, secret) = crypto::sign_keypair();
        let kx_pub = [3u8; KX_PUBLIC_KEY_SIZE];
        let (packet, upgrade_token) = build_upgrade_request(0xDEAD_BEEF, &kx_pub, &secret);

        assert_eq!(packet[0], packet::UPGRADE_REQUEST);
        assert_eq!(&packet[9 + KX_PUBLIC_KEY_SIZE..9 + KX_PUBLIC_KEY_SIZE + 32], &upgrade_token[..]);
        assert_eq!(
            u64::from_be_bytes(packet[1..9].try_into().unwrap()),
            0xDEAD_BEEF
        );
        assert_eq!(&packet[9..9 + KX_PUBLIC_KEY_SIZE], &kx_pub[..]);
    }
}
