//! Sends a handful of application payloads from client to server and back, over the cleartext
//! Direct path (the only path available once `NullBackendClient` never grants a route). Takes no
//! flags. Exits 0 once every payload it sent has echoed back, 1 on setup failure or timeout.

use demos::{build, upgrade_on_first_contact};
use flux::logging;
use slog::info;
use std::process;

const TIMEOUT_SECONDS: f64 = 5.0;
const TICK_SLEEP: std::time::Duration = std::time::Duration::from_millis(10);
const MESSAGES: &[&str] = &["ping-0", "ping-1", "ping-2"];

fn main() {
    let logger = logging::root_logger();

    let mut harness = match build(&logger, "127.0.0.1:0", "127.0.0.1:43101", "127.0.0.1:43101") {
        Ok(h) => h,
        Err(err) => {
            eprintln!("failed to stand up demo endpoints: {:?}", err);
            process::exit(1);
        }
    };

    let mut next_send = 0usize;
    let mut echoed = 0usize;
    let mut last_send_time = f64::NEG_INFINITY;

    loop {
        let now = harness.clock.now();
        if now > TIMEOUT_SECONDS {
            eprintln!("only {}/{} messages echoed back within {}s", echoed, MESSAGES.len(), TIMEOUT_SECONDS);
            process::exit(1);
        }

        if next_send < MESSAGES.len() && now - last_send_time > 0.25 {
            let _ = harness.client.send_packet(MESSAGES[next_send].as_bytes());
            last_send_time = now;
            next_send += 1;
        }

        for payload in harness.server.update(now) {
            let _ = upgrade_on_first_contact(&mut harness, payload.client_address, now);
            if let Some(session_id) = harness.server.session_id_for(payload.client_address) {
                let _ = harness.server.send_packet(session_id, &payload.bytes);
            }
        }

        for payload in harness.client.update(now) {
            echoed += 1;
            info!(logger, "client received echo"; "payload" => String::from_utf8_lossy(&payload).into_owned());
        }

        if echoed >= MESSAGES.len() {
            info!(logger, "all messages echoed"; "count" => echoed);
            break;
        }

        std::thread::sleep(TICK_SLEEP);
    }

    harness.client.destroy();
    harness.server.destroy();
}
