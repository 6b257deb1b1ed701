//! Listener, routes, and pre-upgrade authentication policy.
//!
//! One TCP listener carries three surfaces: the extension uplink upgrade
//! (origin allow-list), the per-client downlink upgrades (optional token),
//! and the recording control HTTP endpoints. Auth violations terminate the
//! handshake with a 4xx before any WebSocket exists.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::RelayConfig;
use crate::state::{RelayState, SharedState};
use crate::{downlink, recording, uplink};

#[derive(Clone)]
pub(crate) struct AppCtx {
	pub config: Arc<RelayConfig>,
	pub state: SharedState,
}

/// A bound, not-yet-running relay. Splitting bind from run lets callers
/// (and tests) learn the actual address before serving.
pub struct RelayServer {
	listener: TcpListener,
	addr: SocketAddr,
	ctx: AppCtx,
}

impl RelayServer {
	pub async fn bind(config: RelayConfig) -> Result<Self> {
		let addr: SocketAddr = format!("{}:{}", config.host, config.port)
			.parse()
			.with_context(|| format!("Invalid host/port: {}:{}", config.host, config.port))?;
		let listener = TcpListener::bind(addr)
			.await
			.with_context(|| format!("Failed to bind relay server to {addr}"))?;
		let addr = listener.local_addr().context("Relay listener has no local addr")?;

		Ok(Self {
			listener,
			addr,
			ctx: AppCtx {
				config: Arc::new(config),
				state: RelayState::shared(),
			},
		})
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.addr
	}

	pub async fn run(self) -> Result<()> {
		info!(target = "relay", addr = %self.addr, "Relay server listening");
		let app = router(self.ctx);
		axum::serve(self.listener, app.into_make_service())
			.await
			.context("Relay server error")
	}
}

/// Binds and serves in one call.
pub async fn run_relay_server(config: RelayConfig) -> Result<()> {
	RelayServer::bind(config).await?.run().await
}

fn router(ctx: AppCtx) -> Router {
	Router::new()
		.route("/", get(|| async { "OK" }))
		.route("/extension", get(extension_upgrade))
		.route("/cdp/{client_id}", get(client_upgrade))
		.route("/recording/start", post(recording::start))
		.route("/recording/stop", post(recording::stop))
		.route("/recording/status", get(recording::status))
		.route("/recording/cancel", post(recording::cancel))
		.with_state(ctx)
}

async fn extension_upgrade(
	ws: WebSocketUpgrade,
	headers: HeaderMap,
	State(ctx): State<AppCtx>,
) -> Response {
	let origin = headers
		.get(header::ORIGIN)
		.and_then(|value| value.to_str().ok());
	match origin {
		Some(origin) if ctx.config.origin_allowed(origin) => {
			ws.on_upgrade(move |socket| uplink::handle_uplink(socket, ctx))
				.into_response()
		}
		Some(origin) => {
			warn!(target = "relay", origin, "Rejecting extension upgrade from disallowed origin");
			(StatusCode::FORBIDDEN, "origin not allowed").into_response()
		}
		None => {
			warn!(target = "relay", "Rejecting extension upgrade with no origin");
			(StatusCode::FORBIDDEN, "origin required").into_response()
		}
	}
}

#[derive(Debug, Deserialize)]
struct ClientQuery {
	token: Option<String>,
}

async fn client_upgrade(
	Path(client_id): Path<String>,
	Query(query): Query<ClientQuery>,
	ws: WebSocketUpgrade,
	State(ctx): State<AppCtx>,
) -> Response {
	if !ctx.config.token_accepted(query.token.as_deref()) {
		warn!(target = "relay", client = %client_id, "Rejecting client upgrade with bad token");
		return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
	}
	ws.on_upgrade(move |socket| downlink::handle_downlink(socket, ctx, client_id))
		.into_response()
}
