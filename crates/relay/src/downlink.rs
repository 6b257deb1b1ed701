//! Downlink (automation client) connection task.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use tabrelay_protocol::{ClientCommand, client_response};

use crate::error::RelayError;
use crate::server::AppCtx;
use crate::state::{DownlinkHandle, text};

pub(crate) async fn handle_downlink(socket: WebSocket, ctx: AppCtx, client_id: String) {
	info!(target = "relay", client = %client_id, "Client connected");

	let (handle, rx) = {
		let mut state = ctx.state.lock().await;
		state.register_downlink(client_id.clone())
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

	while let Some(msg) = ws_rx.next().await {
		match msg {
			Ok(Message::Text(raw)) => handle_command(&ctx, &handle, &raw).await,
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				warn!(target = "relay", client = %client_id, error = %err, "Client websocket error");
				break;
			}
		}
	}

	{
		let mut state = ctx.state.lock().await;
		state.remove_downlink(handle.conn);
	}
	send_task.abort();
	info!(target = "relay", client = %client_id, "Client disconnected");
}

async fn handle_command(ctx: &AppCtx, handle: &DownlinkHandle, raw: &str) {
	let cmd: ClientCommand = match serde_json::from_str(raw) {
		Ok(cmd) => cmd,
		Err(err) => {
			warn!(
				target = "relay",
				client = %handle.label,
				error = %err,
				"Dropping malformed client command"
			);
			return;
		}
	};

	let id = cmd.id;
	let session_id = cmd.session_id.clone();
	let outcome = {
		let mut state = ctx.state.lock().await;
		state.forward_command(handle, cmd)
	};

	// No uplink: answer immediately rather than queueing.
	if let Err(RelayError::UplinkUnavailable) = outcome {
		let frame = client_response(id, session_id.as_deref(), Err("extension not connected"));
		let _ = handle.tx.send(text(frame));
	}
}
