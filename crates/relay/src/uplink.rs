//! Extension uplink connection task: inbound dispatch and heartbeat.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use tabrelay_protocol::{UplinkMessage, ping};

use crate::recording;
use crate::server::AppCtx;
use crate::state::text;

pub(crate) async fn handle_uplink(socket: WebSocket, ctx: AppCtx) {
	info!(target = "relay", "Extension connected");

	let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
	let generation = {
		let mut state = ctx.state.lock().await;
		state.register_uplink(tx.clone())
	};

	let mut rx_stream = UnboundedReceiverStream::new(rx);
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(msg) = rx_stream.next().await {
			if ws_tx.send(msg).await.is_err() {
				break;
			}
		}
	});

	let mut ping_interval = tokio::time::interval(ctx.config.heartbeat_interval);
	let mut last_pong = Instant::now();

	loop {
		tokio::select! {
			_ = ping_interval.tick() => {
				if last_pong.elapsed() > ctx.config.heartbeat_timeout {
					warn!(target = "relay", "Uplink heartbeat timed out, marking stale");
					break;
				}
				let _ = tx.send(text(ping()));
			}
			msg = ws_rx.next() => {
				match msg {
					Some(Ok(Message::Text(raw))) => {
						dispatch(&ctx, generation, &raw, &mut last_pong).await;
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(err)) => {
						warn!(target = "relay", error = %err, "Extension websocket error");
						break;
					}
				}
			}
		}
	}

	let torn_down = {
		let mut state = ctx.state.lock().await;
		state.teardown_uplink(generation)
	};
	send_task.abort();
	if torn_down {
		info!(target = "relay", "Extension disconnected");
	}
}

/// Single decode boundary for everything the extension sends. Malformed
/// frames are protocol anomalies: logged and dropped, never fatal.
async fn dispatch(ctx: &AppCtx, generation: u64, raw: &str, last_pong: &mut Instant) {
	if !ctx.state.lock().await.uplink_is_current(generation) {
		debug!(target = "relay", "Ignoring frame from replaced uplink");
		return;
	}

	let message = match UplinkMessage::parse(raw) {
		Ok(message) => message,
		Err(err) => {
			warn!(target = "relay", error = %err, "Dropping malformed uplink message");
			return;
		}
	};

	match message {
		UplinkMessage::Response { id, result, error } => {
			let mut state = ctx.state.lock().await;
			state.resolve_response(id, result, error);
		}
		UplinkMessage::Event(event) => {
			let state = ctx.state.lock().await;
			state.route_event(&event);
		}
		UplinkMessage::Log { level, args } => {
			debug!(target = "relay", level, args = %json!(args), "Extension log");
		}
		UplinkMessage::Pong => {
			*last_pong = Instant::now();
		}
		UplinkMessage::RecordingData(chunk) => {
			recording::ingest_chunk(&ctx.state, chunk).await;
		}
		UplinkMessage::RecordingCancelled { tab_id } => {
			recording::ingest_cancelled(&ctx.state, tab_id).await;
		}
	}
}
