//! Backend RPC boundary. The core never performs its own HTTP/gRPC calls; it consumes whatever a
//! `BackendClient` implementation hands back. Grounded in the trait-boundary pattern the teacher
//! uses to keep `flux`/`neutronium`'s transport-agnostic core decoupled from any one wire
//! transport, adapted here to the session-update/server-init/relay-fetch RPC surface this spec
//! calls out as an external collaborator (§1).

use crate::address::Address;
use crate::relay_manager::NearRelay;
use flux::shared::UserId;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RouteDecision {
    Direct,
    Route,
    Continue,
}

#[derive(Debug, Clone)]
pub struct SessionUpdateResponse {
    pub decision: RouteDecision,
    /// Encrypted route or continue tokens, one per hop, ours first.
    pub tokens: Vec<Vec<u8>>,
    pub near_relays: Vec<NearRelay>,
}

#[derive(Debug, Clone)]
pub struct ServerInitResponse {
    pub datacenter_id: u64,
    pub server_relays: Vec<NearRelay>,
}

/// Everything the core needs from the backend; a production implementation would run its own
/// worker thread and post responses back via a channel. The core only consumes whatever this
/// trait returns, synchronously from its perspective.
pub trait BackendClient {
    /// Polls for a session-update response for `session_id`, if one has arrived since the last
    /// poll. Returns `None` while the request is still in flight or none has been issued.
    fn poll_session_response(&mut self, session_id: u64) -> Option<SessionUpdateResponse>;

    /// Polls for the result of server initialization.
    fn poll_server_init(&mut self) -> Option<ServerInitResponse>;

    /// Requests a session update be sent for `session_id`, owned by `user_id` at `client_address`.
    /// Fire-and-forget; the result later arrives via [`poll_session_response`].
    fn request_session_update(&mut self, session_id: u64, user_id: UserId, client_address: Address);

    /// Requests server initialization for the given datacenter.
    fn request_server_init(&mut self, datacenter: &str);
}

/// In-memory stub used by tests and the demo binaries: every session stays direct forever, with
/// no near-relays advertised. This is ambient plumbing the spec's Non-goals exclude a real
/// implementation of, not a new feature surface.
pub struct NullBackendClient;

impl NullBackendClient {
    pub fn new() -> Self {
        NullBackendClient
    }
}

impl Default for NullBackendClient {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendClient for NullBackendClient {
    fn poll_session_response(&mut self, _session_id: u64) -> Option<SessionUpdateResponse> {
        None
    }

    fn poll_server_init(&mut self) -> Option<ServerInitResponse> {
        Some(ServerInitResponse { datacenter_id: 0, server_relays: Vec::new() })
    }

    fn request_session_update(&mut self, _session_id: u64, _user_id: UserId, _client_address: Address) {}

    fn request_server_init(&mut self, _datacenter: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_never_offers_a_route() {
        let mut backend = NullBackendClient::new();
        backend.request_session_update(1, 2, Address::None);
        assert!(backend.poll_session_response(1).is_none());
    }

    #[test]
    fn null_backend_reports_server_init_immediately() {
        let mut backend = NullBackendClient::new();
        let response = backend.poll_server_init().unwrap();
        assert_eq!(response.datacenter_id, 0);
        assert!(response.server_relays.is_empty());
    }
}
