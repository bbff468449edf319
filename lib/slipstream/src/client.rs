//! Client endpoint: owns the UDP socket, the receive worker thread, the route manager and the
//! near-relay ping manager for one local peer. Grounded in `neutronium::net::endpoint::Endpoint`'s
//! split between IO ownership and per-peer protocol state, adapted from a multiplexed TCP poll
//! loop to a single blocking UDP socket + dedicated receive thread (§5).

use crate::address::Address;
use crate::backend::BackendClient;
use crate::control::{self, UPDATE_TYPE_CONTINUE, UPDATE_TYPE_DIRECT, UPDATE_TYPE_ROUTE};
use crate::filter;
use crate::magic::MagicValues;
use crate::packet::{self, PacketType};
use crate::queue::RawPacketQueue;
use crate::relay_manager::RelayPingManager;
use crate::route_manager::RouteManager;
use crate::MAX_PACKET_BYTES;
use flux::crypto::{self, KEY_SIZE, KX_PUBLIC_KEY_SIZE, KX_SECRET_KEY_SIZE, SIGNATURE_SIZE};
use flux::shared::{ErrorType, NetworkError, NetworkResult};
use slog::{info, o, Logger};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

/// Cadence at which a pre-upgrade client resends its "direct" packet, mirroring the retransmit
/// cadence used once a route is established.
pub const DIRECT_KEEPALIVE_TIME: f64 = 0.25;

/// Cadence at which an upgraded client reports path/near-relay quality over the control channel.
pub const CLIENT_STATS_SEND_INTERVAL: f64 = 1.0;

/// Session-control packets never rotate a version the way routed-payload packets do; both sides
/// simply agree on `0` for the lifetime of the control key (see DESIGN.md).
const CONTROL_SESSION_VERSION: u8 = 0;

/// Bytes of a direct (pre-upgrade or fallback) packet before the payload, not counting the
/// trailing pittle: `type+chonkle(16) | open_session_sequence(1) | send_sequence(8)`.
pub const DIRECT_HEADER_BYTES: usize = filter::FILTER_HEADER_BYTES + 1 + 8;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ConnectionType {
    Wired,
    Wifi,
    Cellular,
    Unknown,
}

impl ConnectionType {
    fn to_byte(self) -> u8 {
        match self {
            ConnectionType::Unknown => 0,
            ConnectionType::Wired => 1,
            ConnectionType::Wifi => 2,
            ConnectionType::Cellular => 3,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => ConnectionType::Wired,
            2 => ConnectionType::Wifi,
            3 => ConnectionType::Cellular,
            _ => ConnectionType::Unknown,
        }
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum PlatformId {
    Linux,
    Windows,
    Mac,
    Unknown,
}

impl PlatformId {
    fn to_byte(self) -> u8 {
        match self {
            PlatformId::Unknown => 0,
            PlatformId::Windows => 1,
            PlatformId::Mac => 2,
            PlatformId::Linux => 3,
        }
    }

    fn from_byte(byte: u8) -> Self {
        match byte {
            1 => PlatformId::Windows,
            2 => PlatformId::Mac,
            3 => PlatformId::Linux,
            _ => PlatformId::Unknown,
        }
    }
}

enum ClientSessionState {
    Closed,
    Direct { open_session_sequence: u8, send_sequence: u64 },
    /// `UpgradeResponse` has been sent; waiting on the server's signed `UpgradeConfirm` before
    /// session-keyed framing is trusted for anything but the handshake itself.
    AwaitingConfirm { session_id: u64, open_session_sequence: u8, send_sequence: u64 },
    Upgraded { session_id: u64, open_session_sequence: u8, send_sequence: u64 },
}

/// Drives one local peer's socket, receive thread, and session/route state. `on_packet` is
/// invoked from `update()` for every application payload delivered this tick — it never runs on
/// the receive thread.
pub struct ClientEndpoint {
    socket: Arc<UdpSocket>,
    queue: Arc<RawPacketQueue>,
    shutdown: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,

    magic: MagicValues,
    route_manager: RouteManager,
    relay_manager: RelayPingManager,
    backend: Box<dyn BackendClient + Send>,

    server_address: Address,
    session: ClientSessionState,

    kx_public: [u8; KX_PUBLIC_KEY_SIZE],
    kx_secret: [u8; KX_SECRET_KEY_SIZE],
    route_public: [u8; KX_PUBLIC_KEY_SIZE],
    /// Per-session control key, derived from the upgrade handshake's X25519 exchange. Also
    /// reused as this hop's route/continue-token decryption key (see DESIGN.md): a real backend
    /// would provision a distinct hop key out of band, but this core's `BackendClient` boundary
    /// never does that provisioning, so the control key stands in for it.
    session_key: Option<[u8; KEY_SIZE]>,
    control_send_sequence: u64,
    last_stats_send_time: f64,

    buyer_public_key: [u8; flux::crypto::SIGN_PUBLIC_KEY_SIZE],
    platform_id: PlatformId,
    connection_type: ConnectionType,

    logger: Logger,
}

impl ClientEndpoint {
    pub fn create(
        bind_address: &str,
        buyer_public_key: [u8; flux::crypto::SIGN_PUBLIC_KEY_SIZE],
        backend: Box<dyn BackendClient + Send>,
        logger: Logger,
    ) -> NetworkResult<Self> {
        let socket = UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(false)?;
        let socket = Arc::new(socket);

        let queue = Arc::new(RawPacketQueue::new(4096));
        let shutdown = Arc::new(AtomicBool::new(false));

        let receiver = spawn_receiver(Arc::clone(&socket), Arc::clone(&queue), Arc::clone(&shutdown));

        let (kx_public, kx_secret) = crypto::kx_keypair();
        let (route_public, _route_secret) = crypto::kx_keypair();

        Ok(ClientEndpoint {
            socket,
            queue,
            shutdown,
            receiver: Some(receiver),
            magic: MagicValues::new(),
            route_manager: RouteManager::new(),
            relay_manager: RelayPingManager::new(),
            backend,
            server_address: Address::None,
            session: ClientSessionState::Closed,
            kx_public,
            kx_secret,
            route_public,
            session_key: None,
            control_send_sequence: 0,
            last_stats_send_time: f64::NEG_INFINITY,
            buyer_public_key,
            platform_id: PlatformId::Unknown,
            connection_type: ConnectionType::Unknown,
            logger: logger.new(o!("component" => "client_endpoint")),
        })
    }

    /// Overrides the platform/connection-type fields advertised in `UpgradeResponse`. Host
    /// applications call this right after `create` once they know their own platform; the core
    /// does not autodetect it (see `disable_autodetect`, an external collaborator's concern).
    pub fn set_platform_info(&mut self, platform_id: PlatformId, connection_type: ConnectionType) {
        self.platform_id = platform_id;
        self.connection_type = connection_type;
    }

    /// Enters a pre-upgrade state: sends "direct" packets carrying a fresh open-session sequence
    /// until the server replies with an upgrade request.
    pub fn open_session(&mut self, server_address: Address) {
        self.server_address = server_address;
        self.session = ClientSessionState::Direct { open_session_sequence: 0, send_sequence: 0 };
        info!(self.logger, "opening session"; "server" => %server_address);
    }

    pub fn close_session(&mut self) {
        self.session = ClientSessionState::Closed;
        self.session_key = None;
        self.server_address = Address::None;
    }

    /// Sends `bytes` on the current route if one is installed, otherwise direct.
    pub fn send_packet(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        if bytes.len() > MAX_PACKET_BYTES {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }

        let local_address = self.local_address();
        if let Some((packet, next_hop)) =
            self.route_manager.prepare_send_packet(bytes, self.magic.current, local_address)
        {
            return self.send_to(&packet, next_hop);
        }

        self.send_packet_direct(bytes)
    }

    /// Always sends direct, bypassing any installed route.
    pub fn send_packet_direct(&mut self, bytes: &[u8]) -> NetworkResult<()> {
        if bytes.len() > MAX_PACKET_BYTES {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }
        if self.server_address.is_none() {
            return Ok(()); // no session open: send_packet fails silently per §4.4
        }

        let local_address = self.local_address();
        let packet = match &mut self.session {
            ClientSessionState::Direct { open_session_sequence, send_sequence } => {
                let seq = *send_sequence;
                *send_sequence += 1;
                build_direct_packet(
                    self.magic.current,
                    local_address,
                    self.server_address,
                    *open_session_sequence,
                    seq,
                    bytes,
                )
            }
            ClientSessionState::AwaitingConfirm { open_session_sequence, send_sequence, .. }
            | ClientSessionState::Upgraded { open_session_sequence, send_sequence, .. } => {
                let seq = *send_sequence;
                *send_sequence += 1;
                build_direct_packet(
                    self.magic.current,
                    local_address,
                    self.server_address,
                    *open_session_sequence,
                    seq,
                    bytes,
                )
            }
            ClientSessionState::Closed => return Ok(()),
        };

        self.send_to(&packet, self.server_address)
    }

    /// This socket's own bound address, used as the `from` half of the address pair the server
    /// verifies the filter prefix against (§4.1).
    fn local_address(&self) -> Address {
        self.socket.local_addr().map(Address::from_socket_addr).unwrap_or(Address::None)
    }

    fn send_to(&self, packet: &[u8], to: Address) -> NetworkResult<()> {
        let addr = to.to_socket_addr().ok_or(NetworkError::Fatal(ErrorType::AddrParse))?;
        self.socket.send_to(packet, addr)?;
        Ok(())
    }

    /// Host-driven tick: drains the receive queue, services route-manager retransmits/timeouts,
    /// and pumps near-relay pings. Returns every application payload delivered this tick, in
    /// arrival order.
    pub fn update(&mut self, now: f64) -> Vec<Vec<u8>> {
        let mut delivered = Vec::new();
        for (from, bytes) in self.queue.drain() {
            if let Some(payload) = self.process_inbound(from, &bytes, now) {
                delivered.push(payload);
            }
        }

        self.route_manager.check_for_timeouts(now);
        for (packet, to) in self.route_manager.packets_to_send(now) {
            let _ = self.send_to(&packet, to);
        }

        if let Some((packet, to)) =
            self.route_manager.send_session_ping(self.magic.current, now, self.local_address())
        {
            let _ = self.send_to(&packet, to);
        }

        for (sequence, relay_addr, token, expire) in self.relay_manager.pings_to_send(now) {
            let mut payload = Vec::with_capacity(8 + 8 + 8 + 32);
            payload.extend_from_slice(&sequence.to_be_bytes());
            payload.extend_from_slice(&self.current_session_id().unwrap_or(0).to_be_bytes());
            payload.extend_from_slice(&expire.to_be_bytes());
            payload.extend_from_slice(&token);
            let mut packet = vec![packet::CLIENT_PING];
            packet.extend_from_slice(&payload);
            let _ = self.send_to(&packet, relay_addr);
        }

        self.send_client_stats_if_due(now);

        delivered
    }

    fn current_session_id(&self) -> Option<u64> {
        match &self.session {
            ClientSessionState::Upgraded { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// `true` once the upgrade handshake has completed and session-keyed framing (control
    /// channel, and routed payloads once a route is installed) is trusted. Host applications use
    /// this to decide when it's worth sending more than keepalives.
    pub fn is_upgraded(&self) -> bool {
        matches!(self.session, ClientSessionState::Upgraded { .. })
    }

    /// The session id assigned by the server, once upgraded.
    pub fn session_id(&self) -> Option<u64> {
        self.current_session_id()
    }

    /// Whether a route is currently installed (as opposed to direct or mid-handshake).
    pub fn is_on_route(&self) -> bool {
        self.route_manager.is_on_route()
    }

    fn next_control_sequence(&mut self) -> u64 {
        let sequence = self.control_send_sequence;
        self.control_send_sequence += 1;
        sequence
    }

    /// Sends a `ClientStats` report over the control channel, once per [`CLIENT_STATS_SEND_INTERVAL`]
    /// while upgraded. Path stats come from the route manager's own session-ping history; near-relay
    /// stats from the relay ping manager, over the same trailing-slice window (§4.7).
    fn send_client_stats_if_due(&mut self, now: f64) {
        if now - self.last_stats_send_time < CLIENT_STATS_SEND_INTERVAL {
            return;
        }
        let session_id = match self.current_session_id() {
            Some(id) => id,
            None => return,
        };
        let key = match self.session_key {
            Some(key) => key,
            None => return,
        };
        self.last_stats_send_time = now;

        let path_stats = self.route_manager.route_stats(now);
        let near_relays = self
            .relay_manager
            .stats_summary(now - crate::SLICE_SECONDS, now)
            .into_iter()
            .map(|(id, stats)| (id, stats.rtt as f32, stats.jitter as f32, stats.packet_loss as f32))
            .collect();

        let report = control::ClientStatsReport {
            path_rtt_ms: path_stats.rtt as f32,
            path_jitter_ms: path_stats.jitter as f32,
            path_loss_percent: path_stats.packet_loss as f32,
            on_route: self.route_manager.is_on_route(),
            near_relays,
        };
        let payload = control::encode_client_stats(&report);
        let sequence = self.next_control_sequence();
        let packet = control::build_sealed(
            packet::CLIENT_STATS,
            self.magic.current,
            sequence,
            session_id,
            CONTROL_SESSION_VERSION,
            &payload,
            &key,
            self.local_address(),
            self.server_address,
        );
        let _ = self.send_to(&packet, self.server_address);
    }

    fn process_inbound(&mut self, from: Address, data: &[u8], now: f64) -> Option<Vec<u8>> {
        if !filter::run_gauntlet(data, &self.magic, from, self.server_address) {
            return None;
        }

        match PacketType::from_byte(data[0]) {
            PacketType::UpgradeRequest => {
                self.handle_upgrade_request(data);
                None
            }
            PacketType::UpgradeConfirm => {
                self.handle_upgrade_confirm(data);
                None
            }
            PacketType::ServerToClient => self.handle_server_to_client(data),
            PacketType::Direct => self.handle_direct(data),
            PacketType::RouteResponse => {
                self.route_manager.confirm_pending_route_from_packet(data, now);
                None
            }
            PacketType::ContinueResponse => {
                self.route_manager.confirm_continue_from_packet(data);
                None
            }
            PacketType::SessionPong => {
                self.route_manager.receive_session_pong(data, now);
                None
            }
            PacketType::RouteUpdate => {
                self.handle_route_update(data, now);
                None
            }
            PacketType::ClientRelayUpdate => {
                self.handle_relay_update(data, now);
                None
            }
            PacketType::ClientPong => {
                self.relay_manager.pong_received(
                    from,
                    u64::from_be_bytes(data[18..26].try_into().unwrap_or([0; 8])),
                    now,
                );
                None
            }
            _ => None,
        }
    }

    /// Decodes a `RouteUpdate`, dispatches it to the route manager by `update_type`, adopts the
    /// pushed magic triple, and acknowledges with a `RouteAck`. Grounded in §4.2/§4.4.
    fn handle_route_update(&mut self, data: &[u8], now: f64) {
        let session_id = match self.current_session_id() {
            Some(id) => id,
            None => return,
        };
        let key = match self.session_key {
            Some(key) => key,
            None => return,
        };
        let (_fields, payload) = match control::read_sealed(data, packet::ROUTE_UPDATE, &key) {
            Some(v) => v,
            None => return,
        };
        let decoded = match control::decode_route_update(&payload) {
            Some(d) => d,
            None => return,
        };

        let local_address = self.local_address();
        match decoded.update_type {
            UPDATE_TYPE_DIRECT => self.route_manager.direct_route(),
            UPDATE_TYPE_ROUTE => {
                self.route_manager.begin_next_route(
                    &decoded.tokens,
                    &key,
                    decoded.magic.current,
                    now,
                    local_address,
                );
            }
            UPDATE_TYPE_CONTINUE => {
                self.route_manager.continue_next_route(
                    &decoded.tokens,
                    &key,
                    decoded.magic.current,
                    now,
                    local_address,
                );
            }
            _ => return,
        }
        self.magic.set(decoded.magic.current, decoded.magic.upcoming, decoded.magic.previous);

        let sequence = self.next_control_sequence();
        let ack = control::build_sealed(
            packet::ROUTE_ACK,
            self.magic.current,
            sequence,
            session_id,
            CONTROL_SESSION_VERSION,
            &[],
            &key,
            local_address,
            self.server_address,
        );
        let _ = self.send_to(&ack, self.server_address);
    }

    /// Decodes a `ClientRelayUpdate`, installs the relay set, and acknowledges with a
    /// `ClientRelayAck`. Grounded in §4.6.
    fn handle_relay_update(&mut self, data: &[u8], now: f64) {
        let session_id = match self.current_session_id() {
            Some(id) => id,
            None => return,
        };
        let key = match self.session_key {
            Some(key) => key,
            None => return,
        };
        let (_fields, payload) = match control::read_sealed(data, packet::CLIENT_RELAY_UPDATE, &key) {
            Some(v) => v,
            None => return,
        };
        let relays = match control::decode_relay_update(&payload) {
            Some(r) => r,
            None => return,
        };
        self.relay_manager.set_relays(relays, now);

        let sequence = self.next_control_sequence();
        let ack = control::build_sealed(
            packet::CLIENT_RELAY_ACK,
            self.magic.current,
            sequence,
            session_id,
            CONTROL_SESSION_VERSION,
            &[],
            &key,
            self.local_address(),
            self.server_address,
        );
        let _ = self.send_to(&ack, self.server_address);
    }

    /// `type(1) | session_id(8) | server_kx_pub(32) | upgrade_token(32) | signature(64)`, signed
    /// with the buyer's private key over everything before the signature.
    fn handle_upgrade_request(&mut self, data: &[u8]) {
        const FIXED_LEN: usize = 1 + 8 + KX_PUBLIC_KEY_SIZE + 32 + SIGNATURE_SIZE;
        if data.len() != FIXED_LEN {
            return;
        }

        let session_id = u64::from_be_bytes(data[1..9].try_into().unwrap());
        let mut server_kx_pub = [0u8; KX_PUBLIC_KEY_SIZE];
        server_kx_pub.copy_from_slice(&data[9..9 + KX_PUBLIC_KEY_SIZE]);
        let upgrade_token_range = 9 + KX_PUBLIC_KEY_SIZE..9 + KX_PUBLIC_KEY_SIZE + 32;
        let upgrade_token = &data[upgrade_token_range];
        let signed_range = 1..9 + KX_PUBLIC_KEY_SIZE + 32;
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&data[data.len() - SIGNATURE_SIZE..]);

        if !crypto::sign_verify_detached(&signature, &data[signed_range], &self.buyer_public_key) {
            return;
        }

        let shared_key = match crypto::kx_shared_key(&self.kx_secret, &server_kx_pub) {
            Some(key) => key,
            None => return,
        };

        self.session_key = Some(shared_key);
        self.session =
            ClientSessionState::AwaitingConfirm { session_id, open_session_sequence: 0, send_sequence: 0 };

        let response = build_upgrade_response(
            session_id,
            &self.kx_public,
            &self.route_public,
            self.platform_id,
            self.connection_type,
            upgrade_token,
        );
        let _ = self.send_to(&response, self.server_address);

        info!(self.logger, "sent upgrade response"; "session_id" => session_id);
    }

    /// `type(1) | session_id(8) | signature(64)`, signed over `type ‖ session_id`.
    fn handle_upgrade_confirm(&mut self, data: &[u8]) {
        const FIXED_LEN: usize = 1 + 8 + SIGNATURE_SIZE;
        if data.len() != FIXED_LEN {
            return;
        }

        let session_id = u64::from_be_bytes(data[1..9].try_into().unwrap());
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&data[9..9 + SIGNATURE_SIZE]);

        if !crypto::sign_verify_detached(&signature, &data[0..9], &self.buyer_public_key) {
            return;
        }

        if let ClientSessionState::AwaitingConfirm { session_id: pending, .. } = &self.session {
            if *pending == session_id {
                self.session = ClientSessionState::Upgraded {
                    session_id,
                    open_session_sequence: 0,
                    send_sequence: 0,
                };
                info!(self.logger, "session upgrade confirmed"; "session_id" => session_id);
            }
        }
    }

    fn handle_server_to_client(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        self.route_manager.process_server_to_client_packet(data).map(|(_, payload)| payload)
    }

    fn handle_direct(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < DIRECT_HEADER_BYTES + filter::PITTLE_BYTES {
            return None;
        }
        Some(data[DIRECT_HEADER_BYTES..data.len() - filter::PITTLE_BYTES].to_vec())
    }

    pub fn destroy(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Wake the blocking receiver by sending ourselves an empty datagram.
        if let Ok(addr) = self.socket.local_addr() {
            let _ = self.socket.send_to(&[0u8], addr);
        }
        if let Some(handle) = self.receiver.take() {
            let _ = handle.join();
        }
    }
}

pub(crate) fn spawn_receiver(
    socket: Arc<UdpSocket>,
    queue: Arc<RawPacketQueue>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; MAX_PACKET_BYTES];
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            match socket.recv_from(&mut buf) {
                Ok((len, from)) => {
                    let address = Address::from_socket_addr(from);
                    queue.push(address, buf[..len].to_vec());
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(_) => continue,
            }
        }
    })
}

/// Builds an `UpgradeResponse`: `type(1) | session_id(8) | client_kx_pub(32) | route_pub(32) |
/// platform_id(1) | connection_type(1) | upgrade_token(32)`, unsigned (the client has no signing
/// key of its own; authenticity of the exchange rests on the buyer-signed request/confirm).
fn build_upgrade_response(
    session_id: u64,
    client_kx_pub: &[u8; KX_PUBLIC_KEY_SIZE],
    route_pub: &[u8; KX_PUBLIC_KEY_SIZE],
    platform_id: PlatformId,
    connection_type: ConnectionType,
    upgrade_token: &[u8],
) -> Vec<u8> {
    let mut out = vec![packet::UPGRADE_RESPONSE];
    out.extend_from_slice(&session_id.to_be_bytes());
    out.extend_from_slice(client_kx_pub);
    out.extend_from_slice(route_pub);
    out.push(platform_id.to_byte());
    out.push(connection_type.to_byte());
    out.extend_from_slice(upgrade_token);
    out
}

/// Builds a direct packet: `type+chonkle(16) | open_session_sequence(1) | send_sequence(8) |
/// payload | pittle(2)`.
pub(crate) fn build_direct_packet(
    magic: [u8; 8],
    from: Address,
    to: Address,
    open_session_sequence: u8,
    send_sequence: u64,
    payload: &[u8],
) -> Vec<u8> {
    let mut out = vec![0u8; DIRECT_HEADER_BYTES + payload.len() + filter::PITTLE_BYTES];
    out[filter::FILTER_HEADER_BYTES] = open_session_sequence;
    out[filter::FILTER_HEADER_BYTES + 1..filter::FILTER_HEADER_BYTES + 9]
        .copy_from_slice(&send_sequence.to_be_bytes());
    out[DIRECT_HEADER_BYTES..DIRECT_HEADER_BYTES + payload.len()].copy_from_slice(payload);
    let len = out.len();
    filter::write_filter_prefix(&mut out, packet::DIRECT, magic, from, to, len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_packet_layout_matches_scenario_s1() {
        let from: Address = "5.6.7.8:9".parse().unwrap();
        let to: Address = "1.2.3.4:5".parse().unwrap();
        let payload = vec![7u8; 100];
        let magic = MagicValues::new();
        let packet = build_direct_packet(magic.current, from, to, 3, 9, &payload);

        assert_eq!(packet.len(), DIRECT_HEADER_BYTES + 100 + filter::PITTLE_BYTES);
        assert_eq!(packet[0], packet::DIRECT);
        assert_eq!(packet[filter::FILTER_HEADER_BYTES], 3);
        assert_eq!(
            u64::from_be_bytes(
                packet[filter::FILTER_HEADER_BYTES + 1..filter::FILTER_HEADER_BYTES + 9]
                    .try_into()
                    .unwrap()
            ),
            9
        );
        assert_eq!(&packet[DIRECT_HEADER_BYTES..DIRECT_HEADER_BYTES + 100], &payload[..]);
        assert!(filter::run_gauntlet(&packet, &magic, from, to));
    }
}
