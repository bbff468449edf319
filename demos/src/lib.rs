//! Shared setup for the demo binaries under `src/bin/`. These are not part of the library's
//! public API surface (§6); they exist to exercise `slipstream` end to end the way a host
//! application would, without a real backend.

use flux::crypto;
use flux::time::Clock;
use flux::shared::NetworkResult;
use slipstream::backend::NullBackendClient;
use slipstream::client::{ClientEndpoint, ConnectionType, PlatformId};
use slipstream::server::ServerEndpoint;
use slipstream::Address;
use slog::{o, Logger};

/// A client and server endpoint sharing one demo buyer keypair, both bound to loopback. Real
/// deployments mint the buyer keypair once (`gen_keys`-style, per the teacher pack) and distribute
/// the public half to clients and the secret half to servers out of band; here, in one process,
/// we just mint it directly.
pub struct Harness {
    pub client: ClientEndpoint,
    pub server: ServerEndpoint,
    pub clock: Clock,
}

/// Builds a client bound to `client_bind` and a server bound to `server_bind` advertising
/// `server_public` as its reachable address, and opens the client's session against it.
pub fn build(logger: &Logger, client_bind: &str, server_bind: &str, server_public: &str) -> NetworkResult<Harness> {
    let (buyer_public, buyer_secret) = crypto::sign_keypair();

    let server_address: Address =
        server_public.parse().unwrap_or_else(|_| panic!("invalid demo server address: {}", server_public));

    let server = ServerEndpoint::create(
        server_bind,
        server_address,
        buyer_secret,
        Box::new(NullBackendClient::new()),
        logger.new(o!("role" => "server")),
    )?;

    let mut client = ClientEndpoint::create(
        client_bind,
        buyer_public,
        Box::new(NullBackendClient::new()),
        logger.new(o!("role" => "client")),
    )?;
    client.set_platform_info(PlatformId::Linux, ConnectionType::Wired);
    client.open_session(server_address);

    Ok(Harness { client, server, clock: Clock::new() })
}

/// Runs the server's half of the upgrade handshake the first time it sees a new client address.
/// A real backend-integrated server upgrades on whatever policy it likes (first packet, an
/// allow-list lookup, ...); the demo just upgrades unconditionally on first contact.
pub fn upgrade_on_first_contact(harness: &mut Harness, from: Address, now: f64) -> NetworkResult<()> {
    if harness.server.session_id_for(from).is_none() {
        harness.server.upgrade_session(from, 1, now)?;
    }
    Ok(())
}
