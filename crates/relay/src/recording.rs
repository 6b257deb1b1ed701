//! Tab-capture recording orchestrator.
//!
//! A small state machine (`Idle → Starting → Active → Stopping → Idle`,
//! with a `Cancelling` branch) layered on the uplink transport plus an HTTP
//! control surface. Chunks are buffered in memory and written once, at
//! finalization, so a racing cancel can discard the buffer atomically under
//! the state lock. Only one recording can exist at a time.

use std::path::PathBuf;
use std::time::Instant;

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use tabrelay_protocol::{RecordingChunk, RecordingControl, RecordingParams};

use crate::error::RelayError;
use crate::server::AppCtx;
use crate::state::SharedState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
	Idle,
	Starting,
	Active,
	Stopping,
	Cancelling,
}

impl Phase {
	fn name(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Starting => "starting",
			Self::Active => "active",
			Self::Stopping => "stopping",
			Self::Cancelling => "cancelling",
		}
	}
}

/// Relay-computed result of a finished recording. `path` and `size` come
/// from the file the relay wrote, never from the uplink.
#[derive(Debug)]
pub(crate) struct FinalizedRecording {
	pub path: PathBuf,
	pub duration_ms: u64,
	pub size: u64,
}

type FinalizeWaiter = oneshot::Sender<std::result::Result<FinalizedRecording, String>>;

/// Work handed out of the lock once the final chunk lands: write `bytes` to
/// `path`, then answer `waiter`.
pub(crate) struct PendingFinalize {
	pub path: PathBuf,
	pub bytes: Vec<u8>,
	pub duration_ms: u64,
	pub waiter: Option<FinalizeWaiter>,
}

pub(crate) struct RecordingSession {
	phase: Phase,
	tab_id: Option<i64>,
	started_at: Option<Instant>,
	output_path: Option<PathBuf>,
	buffer: Vec<u8>,
	finalize: Option<FinalizeWaiter>,
}

impl RecordingSession {
	pub fn new() -> Self {
		Self {
			phase: Phase::Idle,
			tab_id: None,
			started_at: None,
			output_path: None,
			buffer: Vec::new(),
			finalize: None,
		}
	}

	pub fn status_json(&self) -> Value {
		let elapsed_ms = match self.phase {
			Phase::Active | Phase::Stopping => self
				.started_at
				.map(|t| t.elapsed().as_millis() as u64),
			_ => None,
		};
		json!({
			"success": true,
			"state": self.phase.name(),
			"tabId": self.tab_id,
			"elapsedMs": elapsed_ms,
		})
	}

	/// `start` is only legal from `Idle`; anything else fails fast with a
	/// descriptive error, no queueing.
	pub fn begin_start(&mut self, output_path: PathBuf) -> Result<(), RelayError> {
		match self.phase {
			Phase::Idle => {
				self.phase = Phase::Starting;
				self.output_path = Some(output_path);
				Ok(())
			}
			Phase::Starting | Phase::Active => Err(RelayError::RecordingState(
				"recording already in progress".into(),
			)),
			Phase::Stopping => Err(RelayError::RecordingState(
				"recording is being finalized".into(),
			)),
			Phase::Cancelling => Err(RelayError::RecordingState(
				"recording is being cancelled".into(),
			)),
		}
	}

	/// Returns false if the session was cancelled or aborted while the start
	/// request was in flight.
	pub fn complete_start(&mut self, tab_id: Option<i64>) -> bool {
		if self.phase != Phase::Starting {
			return false;
		}
		self.phase = Phase::Active;
		self.tab_id = tab_id;
		self.started_at = Some(Instant::now());
		true
	}

	pub fn fail_start(&mut self) {
		if self.phase == Phase::Starting {
			self.reset();
		}
	}

	pub fn begin_stop(
		&mut self,
	) -> Result<oneshot::Receiver<std::result::Result<FinalizedRecording, String>>, RelayError> {
		if self.phase != Phase::Active {
			return Err(RelayError::RecordingState(format!(
				"no active recording to stop (state: {})",
				self.phase.name()
			)));
		}
		self.phase = Phase::Stopping;
		let (tx, rx) = oneshot::channel();
		self.finalize = Some(tx);
		Ok(rx)
	}

	/// The uplink refused the stop request; the capture is presumed still
	/// running.
	pub fn revert_stop(&mut self) {
		if self.phase == Phase::Stopping {
			self.phase = Phase::Active;
			self.finalize = None;
		}
	}

	/// Discards the buffer and enters `Cancelling`; `finish_cancel` returns
	/// to `Idle` once the uplink has acknowledged.
	pub fn begin_cancel(&mut self) -> Result<(), RelayError> {
		match self.phase {
			Phase::Starting | Phase::Active => {
				self.buffer.clear();
				self.phase = Phase::Cancelling;
				Ok(())
			}
			other => Err(RelayError::RecordingState(format!(
				"no recording to cancel (state: {})",
				other.name()
			))),
		}
	}

	pub fn finish_cancel(&mut self) {
		if self.phase == Phase::Cancelling {
			self.reset();
		}
	}

	/// Unsolicited `recordingCancelled` push: same discard path as an
	/// explicit cancel, from any non-idle state.
	pub fn cancelled_by_uplink(&mut self, tab_id: i64) -> bool {
		if self.phase == Phase::Idle {
			return false;
		}
		if self.tab_id.is_some_and(|t| t != tab_id) {
			warn!(
				target = "relay.rec",
				tab_id, "recordingCancelled for a different tab, ignoring"
			);
			return false;
		}
		if let Some(waiter) = self.finalize.take() {
			let _ = waiter.send(Err("recording cancelled by extension".into()));
		}
		self.reset();
		true
	}

	/// Buffers one chunk. Returns finalization work when this was the final
	/// chunk of a stopping recording. Chunks outside `Active`/`Stopping`
	/// (late data racing a cancel) are dropped.
	pub fn push_chunk(&mut self, tab_id: i64, bytes: Vec<u8>, is_final: bool) -> Option<PendingFinalize> {
		if !matches!(self.phase, Phase::Active | Phase::Stopping) {
			debug!(
				target = "relay.rec",
				tab_id,
				state = self.phase.name(),
				"Dropping recording chunk outside an active recording"
			);
			return None;
		}
		if self.tab_id.is_some_and(|t| t != tab_id) {
			warn!(
				target = "relay.rec",
				tab_id, "Recording chunk for a different tab, dropping"
			);
			return None;
		}
		self.buffer.extend_from_slice(&bytes);
		if !is_final {
			return None;
		}

		if self.phase == Phase::Active {
			// Data ended without a stop request; finalize anyway so the
			// capture is not lost, with nobody waiting on the result.
			warn!(
				target = "relay.rec",
				tab_id, "Final chunk arrived without a stop request"
			);
		}

		let path = self.output_path.take()?;
		let pending = PendingFinalize {
			path,
			bytes: std::mem::take(&mut self.buffer),
			duration_ms: self
				.started_at
				.map(|t| t.elapsed().as_millis() as u64)
				.unwrap_or(0),
			waiter: self.finalize.take(),
		};
		self.reset();
		Some(pending)
	}

	/// Uplink loss: the data is presumed lost. No file is produced.
	pub fn abort(&mut self, reason: &str) {
		if self.phase == Phase::Idle {
			return;
		}
		info!(
			target = "relay.rec",
			state = self.phase.name(),
			reason,
			"Aborting recording"
		);
		if let Some(waiter) = self.finalize.take() {
			let _ = waiter.send(Err(reason.to_string()));
		}
		self.reset();
	}

	fn reset(&mut self) {
		self.phase = Phase::Idle;
		self.tab_id = None;
		self.started_at = None;
		self.output_path = None;
		self.buffer = Vec::new();
		self.finalize = None;
	}
}

/// `POST /recording/start` body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartRequest {
	output_path: PathBuf,
	#[serde(flatten)]
	params: RecordingParams,
}

fn failure(message: impl std::fmt::Display) -> Json<Value> {
	Json(json!({ "success": false, "error": message.to_string() }))
}

pub(crate) async fn start(
	State(ctx): State<AppCtx>,
	Json(req): Json<StartRequest>,
) -> Json<Value> {
	let requested_tab = req.params.tab_id;
	let reply = {
		let mut state = ctx.state.lock().await;
		if let Err(err) = state.recording.begin_start(req.output_path) {
			return failure(err);
		}
		match state.send_control(RecordingControl::Start(req.params)) {
			Ok(rx) => rx,
			Err(err) => {
				state.recording.fail_start();
				return failure(err);
			}
		}
	};

	match reply.await {
		Ok(Ok(result)) => {
			let tab_id = result
				.get("tabId")
				.and_then(Value::as_i64)
				.or(requested_tab);
			let mut state = ctx.state.lock().await;
			if state.recording.complete_start(tab_id) {
				info!(target = "relay.rec", ?tab_id, "Recording started");
				Json(json!({ "success": true, "tabId": tab_id }))
			} else {
				failure("recording was cancelled before it started")
			}
		}
		Ok(Err(message)) => {
			ctx.state.lock().await.recording.fail_start();
			failure(message)
		}
		Err(_) => {
			ctx.state.lock().await.recording.fail_start();
			failure(RelayError::UplinkUnavailable)
		}
	}
}

pub(crate) async fn stop(State(ctx): State<AppCtx>) -> Json<Value> {
	let (ack, finalized) = {
		let mut state = ctx.state.lock().await;
		let finalized = match state.recording.begin_stop() {
			Ok(rx) => rx,
			Err(err) => return failure(err),
		};
		match state.send_control(RecordingControl::Stop) {
			Ok(rx) => (rx, finalized),
			Err(err) => {
				state.recording.revert_stop();
				return failure(err);
			}
		}
	};

	match ack.await {
		Ok(Ok(result)) => {
			// The uplink's own view of the capture; informational only.
			debug!(
				target = "relay.rec",
				ack = %result,
				"Uplink acknowledged stop"
			);
		}
		Ok(Err(message)) => {
			ctx.state.lock().await.recording.revert_stop();
			return failure(message);
		}
		Err(_) => return failure(RelayError::UplinkUnavailable),
	}

	match finalized.await {
		Ok(Ok(recording)) => Json(json!({
			"success": true,
			"path": recording.path,
			"duration": recording.duration_ms,
			"size": recording.size,
		})),
		Ok(Err(message)) => failure(message),
		Err(_) => failure(RelayError::UplinkUnavailable),
	}
}

pub(crate) async fn status(State(ctx): State<AppCtx>) -> Json<Value> {
	let state = ctx.state.lock().await;
	Json(state.recording.status_json())
}

pub(crate) async fn cancel(State(ctx): State<AppCtx>) -> Json<Value> {
	let ack = {
		let mut state = ctx.state.lock().await;
		if let Err(err) = state.recording.begin_cancel() {
			return failure(err);
		}
		// Buffer is already discarded; losing the uplink here just means
		// the capture dies with it.
		state.send_control(RecordingControl::Cancel).ok()
	};

	if let Some(rx) = ack {
		match rx.await {
			Ok(Ok(_)) => {}
			Ok(Err(message)) => {
				warn!(target = "relay.rec", %message, "Uplink rejected cancel");
			}
			Err(_) => {}
		}
	}

	ctx.state.lock().await.recording.finish_cancel();
	info!(target = "relay.rec", "Recording cancelled");
	Json(json!({ "success": true }))
}

/// Handles a `recordingData` push from the uplink. File I/O happens outside
/// the lock; only the buffer mutation is serialized.
pub(crate) async fn ingest_chunk(state: &SharedState, chunk: RecordingChunk) {
	let bytes = match chunk.decode_data() {
		Ok(bytes) => bytes,
		Err(err) => {
			warn!(target = "relay.rec", error = %err, "Undecodable recording chunk");
			return;
		}
	};

	let pending = {
		let mut state = state.lock().await;
		state
			.recording
			.push_chunk(chunk.tab_id, bytes, chunk.is_final)
	};
	let Some(pending) = pending else {
		return;
	};

	let size = pending.bytes.len() as u64;
	let outcome = match tokio::fs::write(&pending.path, &pending.bytes).await {
		Ok(()) => {
			info!(
				target = "relay.rec",
				path = %pending.path.display(),
				size,
				duration_ms = pending.duration_ms,
				"Recording finalized"
			);
			Ok(FinalizedRecording {
				path: pending.path,
				duration_ms: pending.duration_ms,
				size,
			})
		}
		Err(err) => {
			warn!(
				target = "relay.rec",
				path = %pending.path.display(),
				error = %err,
				"Failed writing recording output"
			);
			Err(format!("failed writing recording output: {err}"))
		}
	};

	if let Some(waiter) = pending.waiter {
		let _ = waiter.send(outcome);
	}
}

/// Handles a `recordingCancelled` push (e.g. the captured tab was closed).
pub(crate) async fn ingest_cancelled(state: &SharedState, tab_id: i64) {
	let discarded = {
		let mut state = state.lock().await;
		state.recording.cancelled_by_uplink(tab_id)
	};
	if discarded {
		info!(target = "relay.rec", tab_id, "Recording cancelled by extension");
	}
}
