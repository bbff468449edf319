//! Drives one client against one server, both in this process, through the full upgrade
//! handshake and a few seconds of `ClientStats` reporting over the resulting control channel.
//! Takes no flags. Exits 0 once the client reports `Upgraded`, 1 if endpoint setup fails or the
//! handshake doesn't complete within the timeout.

use demos::{build, upgrade_on_first_contact};
use flux::logging;
use slog::info;
use std::process;

const TIMEOUT_SECONDS: f64 = 5.0;
const TICK_SLEEP: std::time::Duration = std::time::Duration::from_millis(10);

fn main() {
    let logger = logging::root_logger();

    let mut harness = match build(&logger, "127.0.0.1:0", "127.0.0.1:43100", "127.0.0.1:43100") {
        Ok(h) => h,
        Err(err) => {
            eprintln!("failed to stand up demo endpoints: {:?}", err);
            process::exit(1);
        }
    };

    loop {
        let now = harness.clock.now();
        if now > TIMEOUT_SECONDS {
            eprintln!("handshake did not complete within {}s", TIMEOUT_SECONDS);
            process::exit(1);
        }

        if !harness.client.is_upgraded() {
            let _ = harness.client.send_packet(b"hello");
        }

        let delivered = harness.server.update(now);
        for payload in &delivered {
            let _ = upgrade_on_first_contact(&mut harness, payload.client_address, now);
        }

        harness.client.update(now);

        if harness.client.is_upgraded() {
            info!(logger, "handshake complete"; "session_id" => harness.client.session_id().unwrap_or(0), "elapsed" => now);
            break;
        }

        std::thread::sleep(TICK_SLEEP);
    }

    // Let a couple of ClientStats reports round-trip through the server's control-plane
    // handling so the server's view of the session is populated too.
    let report_by = harness.clock.now() + 2.5;
    while harness.clock.now() < report_by {
        let now = harness.clock.now();
        harness.server.update(now);
        harness.client.update(now);
        std::thread::sleep(TICK_SLEEP);
    }

    if let Some(session_id) = harness.client.session_id() {
        match harness.server.session_stats(session_id) {
            Some(stats) => info!(logger, "server observed client stats"; "path_rtt_ms" => stats.path_rtt_ms, "on_route" => stats.on_route),
            None => info!(logger, "server has not yet observed a ClientStats report"),
        }
    }

    harness.client.destroy();
    harness.server.destroy();
}
