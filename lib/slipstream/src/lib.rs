#![allow(clippy::len_without_is_empty)]
#![allow(clippy::too_many_arguments)]

//! Per-session data-plane protocol state machine for a game-traffic accelerator: session
//! upgrade, near-relay ping management, route install/continue/expire, payload framing, replay
//! protection, fallback-to-direct, and the packet-validation gauntlet every inbound datagram must
//! pass. Route *selection* and relay forwarding live upstream of this crate; this crate executes
//! whatever route the backend handed it.

pub const PROTOCOL_ID: u16 = flux::PROTOCOL_ID;
pub const VERSION_ID: [u8; 16] = flux::VERSION_ID;

/// MTU budget for a single payload (`NEXT_MTU`).
pub const MTU: usize = 1200;

/// Upper bound on a fully-framed packet on the wire (`NEXT_MAX_PACKET_BYTES`).
pub const MAX_PACKET_BYTES: usize = 1384;

/// Backend session-update cadence, in seconds (`NEXT_SLICE_SECONDS`).
pub const SLICE_SECONDS: f64 = 10.0;

pub mod address;
pub mod backend;
pub mod bandwidth;
pub mod client;
pub mod codec;
pub mod config;
pub mod control;
pub mod filter;
pub mod header;
pub mod jitter;
pub mod loss;
pub mod magic;
pub mod packet;
pub mod ping_history;
pub mod queue;
pub mod relay_manager;
pub mod replay;
pub mod route_manager;
pub mod server;
pub mod session;
pub mod token;

pub use address::Address;
pub use config::Config;
