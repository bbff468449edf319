//! Hammers one client/server pair with application traffic for a fixed duration, printing a
//! running packet count and the server's view of the session's reported path stats. Takes one
//! optional argument: the soak duration in seconds (default 10). Exits 0 on a clean run, 1 on
//! endpoint setup failure.

use clap::{App, Arg};
use demos::{build, upgrade_on_first_contact};
use flux::logging;
use slog::info;
use std::process;
use std::time::Duration;

const DEFAULT_DURATION_SECONDS: u64 = 10;
const TICK_SLEEP: Duration = Duration::from_millis(5);
const SEND_INTERVAL: f64 = 0.05;

fn main() {
    let matches = App::new("Slipstream Soak")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs a client/server pair against each other for a fixed duration, hammering application traffic.")
        .arg(
            Arg::with_name("DURATION_SECONDS")
                .help("How long to soak, in seconds")
                .required(false),
        )
        .get_matches();

    let duration_seconds: u64 = matches
        .value_of("DURATION_SECONDS")
        .map(|raw| raw.parse().expect("duration must be a non-negative integer"))
        .unwrap_or(DEFAULT_DURATION_SECONDS);

    let logger = logging::root_logger();

    let mut harness = match build(&logger, "127.0.0.1:0", "127.0.0.1:43102", "127.0.0.1:43102") {
        Ok(h) => h,
        Err(err) => {
            eprintln!("failed to stand up demo endpoints: {:?}", err);
            process::exit(1);
        }
    };

    info!(logger, "soak starting"; "duration_seconds" => duration_seconds);

    let deadline = duration_seconds as f64;
    let mut last_send_time = f64::NEG_INFINITY;
    let mut sent: u64 = 0;
    let mut received: u64 = 0;

    while harness.clock.now() < deadline {
        let now = harness.clock.now();

        if now - last_send_time > SEND_INTERVAL {
            let payload = sent.to_be_bytes();
            if harness.client.send_packet(&payload).is_ok() {
                sent += 1;
            }
            last_send_time = now;
        }

        for payload in harness.server.update(now) {
            let _ = upgrade_on_first_contact(&mut harness, payload.client_address, now);
            if let Some(session_id) = harness.server.session_id_for(payload.client_address) {
                let _ = harness.server.send_packet(session_id, &payload.bytes);
            }
        }

        received += harness.client.update(now).len() as u64;

        std::thread::sleep(TICK_SLEEP);
    }

    info!(logger, "soak finished"; "sent" => sent, "received" => received);
    if let Some(session_id) = harness.client.session_id() {
        if let Some(stats) = harness.server.session_stats(session_id) {
            info!(logger, "final client stats seen by server";
                "path_rtt_ms" => stats.path_rtt_ms,
                "path_loss_percent" => stats.path_loss_percent,
                "on_route" => stats.on_route);
        }
    }

    harness.client.destroy();
    harness.server.destroy();
}
