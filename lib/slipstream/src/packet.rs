//! Packet type ids. Values are a compatibility contract — preserve exactly.

pub const PASSTHROUGH: u8 = 0;
pub const ROUTE_REQUEST: u8 = 1;
pub const ROUTE_RESPONSE: u8 = 2;
pub const CLIENT_TO_SERVER: u8 = 3;
pub const SERVER_TO_CLIENT: u8 = 4;
pub const SESSION_PING: u8 = 5;
pub const SESSION_PONG: u8 = 6;
pub const CONTINUE_REQUEST: u8 = 7;
pub const CONTINUE_RESPONSE: u8 = 8;
pub const CLIENT_PING: u8 = 9;
pub const CLIENT_PONG: u8 = 10;
// 11-12 reserved: unused in the wire contract we were handed. Never produced; decoded as
// `PacketType::Reserved` and never acted on.
pub const RESERVED_11: u8 = 11;
pub const RESERVED_12: u8 = 12;
pub const SERVER_PING: u8 = 13;
pub const SERVER_PONG: u8 = 14;
pub const DIRECT: u8 = 20;
pub const DIRECT_PING: u8 = 21;
pub const DIRECT_PONG: u8 = 22;
pub const UPGRADE_REQUEST: u8 = 23;
pub const UPGRADE_RESPONSE: u8 = 24;
pub const UPGRADE_CONFIRM: u8 = 25;
pub const ROUTE_UPDATE: u8 = 26;
/// Same wire packet as the source's `NEXT_ROUTE_UPDATE_ACK_PACKET` alias; one name, one type.
pub const ROUTE_ACK: u8 = 27;
pub const CLIENT_STATS: u8 = 28;
pub const CLIENT_RELAY_UPDATE: u8 = 29;
pub const CLIENT_RELAY_ACK: u8 = 30;

pub const BACKEND_FIRST: u8 = 50;
pub const BACKEND_LAST: u8 = 59;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PacketType {
    Passthrough,
    RouteRequest,
    RouteResponse,
    ClientToServer,
    ServerToClient,
    SessionPing,
    SessionPong,
    ContinueRequest,
    ContinueResponse,
    ClientPing,
    ClientPong,
    ServerPing,
    ServerPong,
    Direct,
    DirectPing,
    DirectPong,
    UpgradeRequest,
    UpgradeResponse,
    UpgradeConfirm,
    RouteUpdate,
    RouteAck,
    ClientStats,
    ClientRelayUpdate,
    ClientRelayAck,
    Backend(u8),
    Reserved(u8),
    Unknown(u8),
}

impl PacketType {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            PASSTHROUGH => PacketType::Passthrough,
            ROUTE_REQUEST => PacketType::RouteRequest,
            ROUTE_RESPONSE => PacketType::RouteResponse,
            CLIENT_TO_SERVER => PacketType::ClientToServer,
            SERVER_TO_CLIENT => PacketType::ServerToClient,
            SESSION_PING => PacketType::SessionPing,
            SESSION_PONG => PacketType::SessionPong,
            CONTINUE_REQUEST => PacketType::ContinueRequest,
            CONTINUE_RESPONSE => PacketType::ContinueResponse,
            CLIENT_PING => PacketType::ClientPing,
            CLIENT_PONG => PacketType::ClientPong,
            RESERVED_11 | RESERVED_12 => PacketType::Reserved(byte),
            SERVER_PING => PacketType::ServerPing,
            SERVER_PONG => PacketType::ServerPong,
            DIRECT => PacketType::Direct,
            DIRECT_PING => PacketType::DirectPing,
            DIRECT_PONG => PacketType::DirectPong,
            UPGRADE_REQUEST => PacketType::UpgradeRequest,
            UPGRADE_RESPONSE => PacketType::UpgradeResponse,
            UPGRADE_CONFIRM => PacketType::UpgradeConfirm,
            ROUTE_UPDATE => PacketType::RouteUpdate,
            ROUTE_ACK => PacketType::RouteAck,
            CLIENT_STATS => PacketType::ClientStats,
            CLIENT_RELAY_UPDATE => PacketType::ClientRelayUpdate,
            CLIENT_RELAY_ACK => PacketType::ClientRelayAck,
            b if b >= BACKEND_FIRST && b <= BACKEND_LAST => PacketType::Backend(b),
            b => PacketType::Unknown(b),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            PacketType::Passthrough => PASSTHROUGH,
            PacketType::RouteRequest => ROUTE_REQUEST,
            PacketType::RouteResponse => ROUTE_RESPONSE,
            PacketType::ClientToServer => CLIENT_TO_SERVER,
            PacketType::ServerToClient => SERVER_TO_CLIENT,
            PacketType::SessionPing => SESSION_PING,
            PacketType::SessionPong => SESSION_PONG,
            PacketType::ContinueRequest => CONTINUE_REQUEST,
            PacketType::ContinueResponse => CONTINUE_RESPONSE,
            PacketType::ClientPing => CLIENT_PING,
            PacketType::ClientPong => CLIENT_PONG,
            PacketType::ServerPing => SERVER_PING,
            PacketType::ServerPong => SERVER_PONG,
            PacketType::Direct => DIRECT,
            PacketType::DirectPing => DIRECT_PING,
            PacketType::DirectPong => DIRECT_PONG,
            PacketType::UpgradeRequest => UPGRADE_REQUEST,
            PacketType::UpgradeResponse => UPGRADE_RESPONSE,
            PacketType::UpgradeConfirm => UPGRADE_CONFIRM,
            PacketType::RouteUpdate => ROUTE_UPDATE,
            PacketType::RouteAck => ROUTE_ACK,
            PacketType::ClientStats => CLIENT_STATS,
            PacketType::ClientRelayUpdate => CLIENT_RELAY_UPDATE,
            PacketType::ClientRelayAck => CLIENT_RELAY_ACK,
            PacketType::Backend(b) | PacketType::Reserved(b) | PacketType::Unknown(b) => b,
        }
    }

    /// Routed-payload packets carry `sequence|session_id|session_version|tag` and are keyed by
    /// the route's AEAD key.
    pub fn is_routed_payload(self) -> bool {
        matches!(
            self,
            PacketType::RouteRequest
                | PacketType::RouteResponse
                | PacketType::ContinueRequest
                | PacketType::ContinueResponse
                | PacketType::ClientToServer
                | PacketType::ServerToClient
                | PacketType::SessionPing
                | PacketType::SessionPong
        )
    }

    /// Session-control packets are keyed by the per-session AEAD key established at upgrade.
    pub fn is_session_control(self) -> bool {
        matches!(
            self,
            PacketType::DirectPing
                | PacketType::DirectPong
                | PacketType::ClientStats
                | PacketType::RouteUpdate
                | PacketType::RouteAck
                | PacketType::ClientRelayUpdate
                | PacketType::ClientRelayAck
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_named_type() {
        let types = [
            PASSTHROUGH, ROUTE_REQUEST, ROUTE_RESPONSE, CLIENT_TO_SERVER, SERVER_TO_CLIENT,
            SESSION_PING, SESSION_PONG, CONTINUE_REQUEST, CONTINUE_RESPONSE, CLIENT_PING,
            CLIENT_PONG, SERVER_PING, SERVER_PONG, DIRECT, DIRECT_PING, DIRECT_PONG,
            UPGRADE_REQUEST, UPGRADE_RESPONSE, UPGRADE_CONFIRM, ROUTE_UPDATE, ROUTE_ACK,
            CLIENT_STATS, CLIENT_RELAY_UPDATE, CLIENT_RELAY_ACK,
        ];

        for byte in types {
            assert_eq!(PacketType::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn reserved_types_are_never_acted_on() {
        assert!(matches!(PacketType::from_byte(11), PacketType::Reserved(11)));
        assert!(matches!(PacketType::from_byte(12), PacketType::Reserved(12)));
    }

    #[test]
    fn backend_range_is_recognized() {
        assert!(matches!(PacketType::from_byte(55), PacketType::Backend(55)));
    }
}
