//! Shared harness: spins up a relay on an ephemeral port and provides
//! WebSocket peers playing the extension and client roles.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tabrelay::config::DEFAULT_EXTENSION_ORIGIN;
use tabrelay::{RelayConfig, RelayServer};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binds the relay on an ephemeral loopback port and serves it in the
/// background.
pub async fn spawn_relay(mut config: RelayConfig) -> SocketAddr {
	config.host = "127.0.0.1".into();
	config.port = 0;
	let server = RelayServer::bind(config).await.expect("bind relay");
	let addr = server.local_addr();
	tokio::spawn(server.run());
	addr
}

pub async fn try_connect_extension(
	addr: SocketAddr,
	origin: Option<&str>,
) -> Result<Ws, tungstenite::Error> {
	let mut request = format!("ws://{addr}/extension")
		.into_client_request()
		.expect("client request");
	if let Some(origin) = origin {
		request
			.headers_mut()
			.insert("Origin", origin.parse().expect("origin header"));
	}
	connect_async(request).await.map(|(ws, _)| ws)
}

pub async fn connect_extension(addr: SocketAddr) -> Ws {
	try_connect_extension(addr, Some(DEFAULT_EXTENSION_ORIGIN))
		.await
		.expect("extension upgrade")
}

pub async fn try_connect_client(
	addr: SocketAddr,
	client_id: &str,
	token: Option<&str>,
) -> Result<Ws, tungstenite::Error> {
	let url = match token {
		Some(token) => format!("ws://{addr}/cdp/{client_id}?token={token}"),
		None => format!("ws://{addr}/cdp/{client_id}"),
	};
	connect_async(url).await.map(|(ws, _)| ws)
}

pub async fn connect_client(addr: SocketAddr, client_id: &str) -> Ws {
	try_connect_client(addr, client_id, None)
		.await
		.expect("client upgrade")
}

pub async fn send_json(ws: &mut Ws, value: Value) {
	ws.send(Message::Text(value.to_string()))
		.await
		.expect("websocket send");
}

/// Sends a frame, tolerating a connection the server has already closed.
pub async fn try_send_json(ws: &mut Ws, value: Value) -> bool {
	ws.send(Message::Text(value.to_string())).await.is_ok()
}

/// Receives the next JSON frame, skipping websocket-level control frames.
pub async fn recv_json(ws: &mut Ws) -> Value {
	loop {
		let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
			.await
			.expect("timed out waiting for frame")
			.expect("stream ended")
			.expect("websocket error");
		match msg {
			Message::Text(text) => return serde_json::from_str(&text).expect("json frame"),
			Message::Ping(_) | Message::Pong(_) => continue,
			other => panic!("unexpected frame: {other:?}"),
		}
	}
}

/// Like [`recv_json`] but also skips the relay's heartbeat pings, which the
/// extension side receives as text frames.
pub async fn recv_relay(ws: &mut Ws) -> Value {
	loop {
		let frame = recv_json(ws).await;
		if frame["method"] == "ping" {
			continue;
		}
		return frame;
	}
}

/// Asserts that no JSON frame arrives within `wait`.
pub async fn assert_no_frame(ws: &mut Ws, wait: Duration) {
	match tokio::time::timeout(wait, ws.next()).await {
		Err(_) => {}
		Ok(Some(Ok(Message::Text(text)))) => panic!("unexpected frame: {text}"),
		Ok(Some(Ok(_))) | Ok(Some(Err(_))) | Ok(None) => {}
	}
}

pub fn assert_upgrade_rejected(err: tungstenite::Error) {
	match err {
		tungstenite::Error::Http(response) => {
			assert!(
				response.status().is_client_error(),
				"expected 4xx rejection, got {}",
				response.status()
			);
		}
		other => panic!("expected http rejection, got {other}"),
	}
}
