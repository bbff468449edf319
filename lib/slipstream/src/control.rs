//! Session-control packet codec: RouteUpdate/RouteAck/ClientStats/ClientRelayUpdate/
//! ClientRelayAck all share the same filter-prefixed, header-sealed wire shape as routed-payload
//! packets (§4.1), but are keyed by the per-session AEAD key established at upgrade rather than a
//! route key, since they must keep working whether or not a route is currently installed.

use crate::address::Address;
use crate::filter;
use crate::header::{self, HeaderFields};
use crate::magic::MagicValues;
use crate::relay_manager::NearRelay;
use flux::crypto::KEY_SIZE;

/// Route-update type tags carried in the first byte of a decrypted `RouteUpdate` payload.
/// Grounded in `NEXT_UPDATE_TYPE_DIRECT/ROUTE/CONTINUE`.
pub const UPDATE_TYPE_DIRECT: u8 = 0;
pub const UPDATE_TYPE_ROUTE: u8 = 1;
pub const UPDATE_TYPE_CONTINUE: u8 = 2;

/// Seals `payload` under `key` and wraps it in filter framing keyed by `magic`. `sequence`/
/// `session_version` feed the AEAD nonce/AAD exactly as for routed-payload packets (§4.1). `from`/
/// `to` are the real address pair the receiver will verify against — see the matching note on
/// [`crate::filter::run_gauntlet`] call sites in `client.rs`/`server.rs`.
pub fn build_sealed(
    packet_type: u8,
    magic: [u8; 8],
    sequence: u64,
    session_id: u64,
    session_version: u8,
    payload: &[u8],
    key: &[u8; KEY_SIZE],
    from: Address,
    to: Address,
) -> Vec<u8> {
    let mut body = vec![0u8; header::HEADER_BYTES + payload.len()];
    header::write_sealed(&mut body, packet_type, sequence, session_id, session_version, payload, key);

    let mut out = vec![0u8; filter::FILTER_HEADER_BYTES + body.len() + filter::PITTLE_BYTES];
    out[filter::FILTER_HEADER_BYTES..filter::FILTER_HEADER_BYTES + body.len()].copy_from_slice(&body);
    let len = out.len();
    filter::write_filter_prefix(&mut out, packet_type, magic, from, to, len);
    out
}

/// Inverse of [`build_sealed`]. `data` is the full gauntlet-verified datagram, filter framing
/// included.
pub fn read_sealed(data: &[u8], packet_type: u8, key: &[u8; KEY_SIZE]) -> Option<(HeaderFields, Vec<u8>)> {
    if data.len() < filter::MIN_PACKET_BYTES + header::HEADER_BYTES {
        return None;
    }
    let inner = &data[filter::FILTER_HEADER_BYTES..data.len() - filter::PITTLE_BYTES];
    let mut payload = vec![0u8; inner.len() - header::HEADER_BYTES];
    let fields = header::read_sealed(inner, packet_type, &mut payload, key)?;
    Some((fields, payload))
}

/// `update_type(1) | magic current/upcoming/previous (8 each) | num_tokens(1) | (len_u16|bytes)*`.
/// The server transmits the whole magic triple rather than just a rotation, so a client that
/// missed prior rotations (or just upgraded) converges in one update (see [`MagicValues::set`]).
pub fn encode_route_update(update_type: u8, magic: &MagicValues, tokens: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![update_type];
    out.extend_from_slice(&magic.current);
    out.extend_from_slice(&magic.upcoming);
    out.extend_from_slice(&magic.previous);
    out.push(tokens.len() as u8);
    for token in tokens {
        out.extend_from_slice(&(token.len() as u16).to_be_bytes());
        out.extend_from_slice(token);
    }
    out
}

pub struct DecodedRouteUpdate {
    pub update_type: u8,
    pub magic: MagicValues,
    pub tokens: Vec<Vec<u8>>,
}

pub fn decode_route_update(payload: &[u8]) -> Option<DecodedRouteUpdate> {
    if payload.len() < 1 + 24 + 1 {
        return None;
    }
    let update_type = payload[0];
    let mut current = [0u8; 8];
    let mut upcoming = [0u8; 8];
    let mut previous = [0u8; 8];
    current.copy_from_slice(&payload[1..9]);
    upcoming.copy_from_slice(&payload[9..17]);
    previous.copy_from_slice(&payload[17..25]);

    let num_tokens = payload[25] as usize;
    let mut offset = 26;
    let mut tokens = Vec::with_capacity(num_tokens);
    for _ in 0..num_tokens {
        if payload.len() < offset + 2 {
            return None;
        }
        let len = u16::from_be_bytes(payload[offset..offset + 2].try_into().unwrap()) as usize;
        offset += 2;
        if payload.len() < offset + len {
            return None;
        }
        tokens.push(payload[offset..offset + len].to_vec());
        offset += len;
    }

    Some(DecodedRouteUpdate { update_type, magic: MagicValues { current, upcoming, previous }, tokens })
}

/// Client-reported path quality, sent periodically over the control channel so the backend's
/// next session-update decision sees fresh numbers. Grounded in `next_client_stats_packet_t`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatsReport {
    pub path_rtt_ms: f32,
    pub path_jitter_ms: f32,
    pub path_loss_percent: f32,
    pub on_route: bool,
    pub near_relays: Vec<(u64, f32, f32, f32)>,
}

pub fn encode_client_stats(report: &ClientStatsReport) -> Vec<u8> {
    let mut out = Vec::with_capacity(14 + report.near_relays.len() * 20);
    out.extend_from_slice(&report.path_rtt_ms.to_be_bytes());
    out.extend_from_slice(&report.path_jitter_ms.to_be_bytes());
    out.extend_from_slice(&report.path_loss_percent.to_be_bytes());
    out.push(report.on_route as u8);
    out.push(report.near_relays.len() as u8);
    for (id, rtt, jitter, loss) in &report.near_relays {
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&rtt.to_be_bytes());
        out.extend_from_slice(&jitter.to_be_bytes());
        out.extend_from_slice(&loss.to_be_bytes());
    }
    out
}

pub fn decode_client_stats(payload: &[u8]) -> Option<ClientStatsReport> {
    if payload.len() < 14 {
        return None;
    }
    let path_rtt_ms = f32::from_be_bytes(payload[0..4].try_into().unwrap());
    let path_jitter_ms = f32::from_be_bytes(payload[4..8].try_into().unwrap());
    let path_loss_percent = f32::from_be_bytes(payload[8..12].try_into().unwrap());
    let on_route = payload[12] != 0;
    let count = payload[13] as usize;
    let mut offset = 14;
    let mut near_relays = Vec::with_capacity(count);
    for _ in 0..count {
        if payload.len() < offset + 20 {
            return None;
        }
        let id = u64::from_be_bytes(payload[offset..offset + 8].try_into().unwrap());
        let rtt = f32::from_be_bytes(payload[offset + 8..offset + 12].try_into().unwrap());
        let jitter = f32::from_be_bytes(payload[offset + 12..offset + 16].try_into().unwrap());
        let loss = f32::from_be_bytes(payload[offset + 16..offset + 20].try_into().unwrap());
        near_relays.push((id, rtt, jitter, loss));
        offset += 20;
    }
    Some(ClientStatsReport { path_rtt_ms, path_jitter_ms, path_loss_percent, on_route, near_relays })
}

/// `num_relays(1) | (id(8)|ipv4_octets(4)|port(2)|ping_token(32)|expire_timestamp(8))*`. Relays
/// are always advertised as IPv4 endpoints, matching the route/continue token wire format.
pub fn encode_relay_update(relays: &[NearRelay]) -> Vec<u8> {
    let mut out = vec![relays.len() as u8];
    for relay in relays {
        out.extend_from_slice(&relay.id.to_be_bytes());
        out.extend_from_slice(&relay.address.v4_octets_be());
        out.extend_from_slice(&relay.address.port().to_be_bytes());
        out.extend_from_slice(&relay.ping_token);
        out.extend_from_slice(&relay.expire_timestamp.to_be_bytes());
    }
    out
}

pub fn decode_relay_update(payload: &[u8]) -> Option<Vec<NearRelay>> {
    if payload.is_empty() {
        return Some(Vec::new());
    }
    let count = payload[0] as usize;
    let mut offset = 1;
    let mut relays = Vec::with_capacity(count);
    for _ in 0..count {
        if payload.len() < offset + 54 {
            return None;
        }
        let id = u64::from_be_bytes(payload[offset..offset + 8].try_into().unwrap());
        let octets: [u8; 4] = payload[offset + 8..offset + 12].try_into().unwrap();
        let port = u16::from_be_bytes(payload[offset + 12..offset + 14].try_into().unwrap());
        let mut ping_token = [0u8; 32];
        ping_token.copy_from_slice(&payload[offset + 14..offset + 46]);
        let expire_timestamp = u64::from_be_bytes(payload[offset + 46..offset + 54].try_into().unwrap());
        relays.push(NearRelay { id, address: Address::from_v4_be(octets, port), ping_token, expire_timestamp });
        offset += 54;
    }
    Some(relays)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> (Address, Address) {
        ("1.2.3.4:5".parse().unwrap(), "9.9.9.9:9".parse().unwrap())
    }

    #[test]
    fn sealed_control_packet_round_trips() {
        let key = [3u8; KEY_SIZE];
        let (from, to) = addrs();
        let packet = build_sealed(crate::packet::ROUTE_ACK, [0; 8], 5, 0xABCD, 2, b"hi", &key, from, to);
        let (fields, payload) = read_sealed(&packet, crate::packet::ROUTE_ACK, &key).unwrap();
        assert_eq!(fields.sequence, 5);
        assert_eq!(fields.session_id, 0xABCD);
        assert_eq!(fields.session_version, 2);
        assert_eq!(&payload[..], b"hi");
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let key = [3u8; KEY_SIZE];
        let other = [4u8; KEY_SIZE];
        let (from, to) = addrs();
        let packet = build_sealed(crate::packet::ROUTE_ACK, [0; 8], 5, 1, 0, b"hi", &key, from, to);
        assert!(read_sealed(&packet, crate::packet::ROUTE_ACK, &other).is_none());
    }

    #[test]
    fn route_update_round_trips_with_tokens() {
        let magic = MagicValues::new();
        let tokens = vec![vec![1u8; 151], vec![2u8; 57]];
        let encoded = encode_route_update(UPDATE_TYPE_ROUTE, &magic, &tokens);
        let decoded = decode_route_update(&encoded).unwrap();
        assert_eq!(decoded.update_type, UPDATE_TYPE_ROUTE);
        assert_eq!(decoded.tokens, tokens);
    }

    #[test]
    fn client_stats_round_trip() {
        let report = ClientStatsReport {
            path_rtt_ms: 12.5,
            path_jitter_ms: 1.1,
            path_loss_percent: 0.0,
            on_route: true,
            near_relays: vec![(7, 5.0, 0.5, 0.1)],
        };
        let encoded = encode_client_stats(&report);
        let decoded = decode_client_stats(&encoded).unwrap();
        assert_eq!(decoded, report);
    }

    #[test]
    fn relay_update_round_trip() {
        let relays = vec![NearRelay {
            id: 1,
            address: "10.0.0.5:4000".parse().unwrap(),
            ping_token: [9u8; 32],
            expire_timestamp: 123,
        }];
        let encoded = encode_relay_update(&relays);
        let decoded = decode_relay_update(&encoded).unwrap();
        assert_eq!(decoded[0].id, relays[0].id);
        assert_eq!(decoded[0].address, relays[0].address);
        assert_eq!(decoded[0].expire_timestamp, relays[0].expire_timestamp);
    }

    #[test]
    fn empty_relay_update_round_trips() {
        let encoded = encode_relay_update(&[]);
        let decoded = decode_relay_update(&encoded).unwrap();
        assert!(decoded.is_empty());
    }
}
