//! Device-Watchdog exchange.
//!
//! The loop sends one DWR, waits for its DWA, publishes a liveness tick and
//! sleeps for the configured interval. Failed rounds are reported and the
//! next round is attempted anyway; only closing the session ends the loop.
//! Inbound DWRs from the peer are answered independently.

use std::sync::Arc;
use std::time::Instant;

use crate::codec::{Command, Message, BASE_APP_ID, DIAMETER_SUCCESS};
use crate::config::SessionConfig;

use super::events::{SessionError, SessionEvent};
use super::handshake::{origin_host, origin_realm};
use super::ids::IdGenerator;
use super::session::{closed, Context};

/// Build a DWR carrying only Origin-Host and Origin-Realm.
pub fn watchdog_request(config: &SessionConfig, ids: &IdGenerator) -> Message {
    Message::request(
        Command::DeviceWatchdog,
        BASE_APP_ID,
        ids.next_hop_by_hop(),
        ids.next_end_to_end(),
    )
    .with_avp(origin_host(config))
    .with_avp(origin_realm(config))
}

/// Build the DWA for a peer's DWR.
pub fn watchdog_answer(config: &SessionConfig, request: &Message) -> Message {
    request
        .answer(DIAMETER_SUCCESS)
        .with_avp(origin_host(config))
        .with_avp(origin_realm(config))
}

/// Answer one inbound DWR.
pub(crate) async fn answer_peer(ctx: &Context, request: &Message) {
    let answer = watchdog_answer(&ctx.config, request);
    match ctx.connection.write_message(&answer).await {
        Ok(_) => tracing::debug!(hop_by_hop = request.hop_by_hop(), "answered peer DWR"),
        Err(err) => ctx.events.report(SessionError::write(Command::DeviceWatchdog, &err)),
    }
}

/// Watchdog loop; returns once the session is closed.
pub(crate) async fn run(ctx: Arc<Context>) {
    let interval = ctx.config.watchdog_interval();
    let mut state = ctx.state.clone();
    let mut tick: u64 = 0;
    tracing::debug!(interval = ?interval, "watchdog started");

    loop {
        if ctx.is_closed() {
            break;
        }
        let request = watchdog_request(&ctx.config, &ctx.ids);
        match ctx.round_trip(request, ctx.config.watchdog_timeout()).await {
            Ok(answer) => {
                tick += 1;
                tracing::debug!(tick, result_code = ?answer.result_code(), "DWA received");
                ctx.events.publish(SessionEvent::WatchdogCompleted(answer));
                ctx.events.publish(SessionEvent::Alive {
                    tick,
                    at: Instant::now(),
                });
            },
            Err(_) if ctx.is_closed() => break,
            Err(e) if e.is_disconnect() => tracing::warn!(tick, "peer unreachable: {}", e),
            Err(e) => tracing::debug!(tick, "watchdog round failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {},
            _ = closed(&mut state) => break,
        }
    }
    tracing::debug!(ticks = tick, "watchdog stopped");
}
