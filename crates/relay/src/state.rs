//! Shared relay state: the single uplink, every downlink, the id remapping
//! table, and session ownership.
//!
//! All four tables form one consistency domain behind one mutex. Connection
//! tasks lock, mutate, send on unbounded channels, and unlock; nothing in
//! here awaits network I/O.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Message;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use tabrelay_protocol::{
	ClientCommand, ForwardedEvent, RecordingControl, client_event, client_response,
	forward_command,
};

use crate::error::RelayError;
use crate::recording::RecordingSession;

pub(crate) type ConnId = u64;
pub(crate) type SharedState = Arc<Mutex<RelayState>>;

/// Outcome of an id-correlated control request, delivered to the HTTP
/// surface via oneshot.
pub(crate) type ControlReply = std::result::Result<Value, String>;

/// Non-owning reference to a downlink connection: enough to route frames to
/// it without holding its task alive.
#[derive(Clone)]
pub(crate) struct DownlinkHandle {
	pub conn: ConnId,
	/// Path-supplied client label; routing only, duplicates may coexist.
	pub label: String,
	pub tx: mpsc::UnboundedSender<Message>,
}

/// An in-flight id mapping, keyed by the uplink-scoped id it was sent under.
pub(crate) enum Pending {
	/// Forwarded downlink command awaiting its response.
	Client {
		downlink: DownlinkHandle,
		client_id: u64,
		session_id: Option<String>,
	},
	/// Recording control request from the HTTP surface.
	Control(oneshot::Sender<ControlReply>),
}

pub(crate) struct RelayState {
	uplink: Option<mpsc::UnboundedSender<Message>>,
	/// Bumped on every uplink registration so a replaced uplink's task
	/// cannot tear down its successor.
	uplink_gen: u64,
	downlinks: HashMap<ConnId, DownlinkHandle>,
	/// Session ownership: at most one downlink per session id.
	sessions: HashMap<String, ConnId>,
	/// Id remapping table, the single source of truth for inbound responses.
	pending: HashMap<u64, Pending>,
	next_uplink_id: u64,
	next_conn_id: ConnId,
	pub recording: RecordingSession,
}

impl RelayState {
	pub fn new() -> Self {
		Self {
			uplink: None,
			uplink_gen: 0,
			downlinks: HashMap::new(),
			sessions: HashMap::new(),
			pending: HashMap::new(),
			next_uplink_id: 0,
			next_conn_id: 0,
			recording: RecordingSession::new(),
		}
	}

	pub fn shared() -> SharedState {
		Arc::new(Mutex::new(Self::new()))
	}

	/// Installs a new uplink, tearing down a previous one (last-connect-wins).
	/// Returns the generation token the connection task must present at
	/// teardown.
	pub fn register_uplink(&mut self, tx: mpsc::UnboundedSender<Message>) -> u64 {
		if let Some(old) = self.uplink.take() {
			warn!(target = "relay", "Replacing existing extension uplink");
			self.fail_uplink("uplink disconnected");
			// Close the replaced socket; a stale extension must not keep
			// feeding shared state.
			let _ = old.send(Message::Close(None));
		}
		self.uplink = Some(tx);
		self.uplink_gen += 1;
		self.uplink_gen
	}

	/// Whether `generation` still names the live uplink. Frames from a
	/// replaced uplink's task are ignored at dispatch.
	pub fn uplink_is_current(&self, generation: u64) -> bool {
		self.uplink.is_some() && self.uplink_gen == generation
	}

	/// Tears down the uplink registered under `generation`. Returns false if
	/// a newer uplink has already replaced it.
	pub fn teardown_uplink(&mut self, generation: u64) -> bool {
		if generation != self.uplink_gen || self.uplink.is_none() {
			return false;
		}
		self.uplink = None;
		self.fail_uplink("uplink disconnected");
		true
	}

	/// Fails every outstanding mapping, clears session ownership, and aborts
	/// any in-flight recording. Sessions cannot outlive the uplink.
	fn fail_uplink(&mut self, reason: &str) {
		let outstanding = self.pending.len();
		for (_, pending) in self.pending.drain() {
			match pending {
				Pending::Client {
					downlink,
					client_id,
					session_id,
				} => {
					let frame = client_response(client_id, session_id.as_deref(), Err(reason));
					let _ = downlink.tx.send(text(frame));
				}
				Pending::Control(tx) => {
					let _ = tx.send(Err(reason.to_string()));
				}
			}
		}
		if outstanding > 0 {
			info!(
				target = "relay",
				outstanding, reason, "Failed in-flight requests"
			);
		}
		self.sessions.clear();
		self.recording.abort(reason);
	}

	pub fn has_uplink(&self) -> bool {
		self.uplink.is_some()
	}

	/// Registers a downlink under a fresh connection id and returns its
	/// handle plus the receiver side of its writer channel.
	pub fn register_downlink(
		&mut self,
		label: String,
	) -> (DownlinkHandle, mpsc::UnboundedReceiver<Message>) {
		let (tx, rx) = mpsc::unbounded_channel();
		self.next_conn_id += 1;
		let handle = DownlinkHandle {
			conn: self.next_conn_id,
			label,
			tx,
		};
		self.downlinks.insert(handle.conn, handle.clone());
		(handle, rx)
	}

	/// Removes a downlink: releases every session it owned and drops every
	/// mapping that referenced it. The requester is gone, so the drops are
	/// only logged.
	pub fn remove_downlink(&mut self, conn: ConnId) {
		let Some(handle) = self.downlinks.remove(&conn) else {
			return;
		};
		let sessions_before = self.sessions.len();
		self.sessions.retain(|_, owner| *owner != conn);
		let released = sessions_before - self.sessions.len();

		let pending_before = self.pending.len();
		self.pending.retain(|_, pending| {
			!matches!(pending, Pending::Client { downlink, .. } if downlink.conn == conn)
		});
		let abandoned = pending_before - self.pending.len();

		if released > 0 || abandoned > 0 {
			warn!(
				target = "relay",
				client = %handle.label,
				released_sessions = released,
				abandoned_requests = abandoned,
				"Downlink closed with live state"
			);
		}
	}

	/// Forwards a downlink command under a fresh uplink id.
	///
	/// A command carrying a not-yet-owned session id claims it for the
	/// sender (first touch), so event routing is in place before the uplink
	/// can emit anything for it.
	pub fn forward_command(
		&mut self,
		downlink: &DownlinkHandle,
		cmd: ClientCommand,
	) -> Result<(), RelayError> {
		let Some(uplink) = self.uplink.clone() else {
			return Err(RelayError::UplinkUnavailable);
		};

		if let Some(sid) = &cmd.session_id {
			self.sessions.entry(sid.clone()).or_insert(downlink.conn);
		}

		let uplink_id = self.allocate_uplink_id();
		let frame = forward_command(uplink_id, &downlink.label, &cmd);
		self.pending.insert(
			uplink_id,
			Pending::Client {
				downlink: downlink.clone(),
				client_id: cmd.id,
				session_id: cmd.session_id,
			},
		);

		if uplink.send(text(frame)).is_err() {
			self.pending.remove(&uplink_id);
			return Err(RelayError::UplinkUnavailable);
		}
		Ok(())
	}

	/// Sends an id-correlated recording control request to the uplink.
	pub fn send_control(
		&mut self,
		control: RecordingControl,
	) -> Result<oneshot::Receiver<ControlReply>, RelayError> {
		let Some(uplink) = self.uplink.clone() else {
			return Err(RelayError::UplinkUnavailable);
		};
		let uplink_id = self.allocate_uplink_id();
		let frame = control.into_message(uplink_id);
		let (tx, rx) = oneshot::channel();
		self.pending.insert(uplink_id, Pending::Control(tx));

		if uplink.send(text(frame)).is_err() {
			self.pending.remove(&uplink_id);
			return Err(RelayError::UplinkUnavailable);
		}
		Ok(rx)
	}

	/// Resolves an inbound uplink response through the remapping table.
	/// Unknown ids are logged and dropped, never fatal.
	pub fn resolve_response(&mut self, id: u64, result: Option<Value>, error: Option<String>) {
		match self.pending.remove(&id) {
			None => {
				warn!(target = "relay", id, "Response with unknown id from uplink");
			}
			Some(Pending::Client {
				downlink,
				client_id,
				session_id,
			}) => {
				// Lazy session registration: a response whose result names a
				// session binds it to the requester.
				if let Some(sid) = result
					.as_ref()
					.and_then(|r| r.get("sessionId"))
					.and_then(Value::as_str)
				{
					self.sessions.entry(sid.to_string()).or_insert(downlink.conn);
				}

				let frame = match &error {
					Some(message) => {
						client_response(client_id, session_id.as_deref(), Err(message))
					}
					None => client_response(
						client_id,
						session_id.as_deref(),
						Ok(result.unwrap_or(Value::Null)),
					),
				};
				if downlink.tx.send(text(frame)).is_err() {
					debug!(
						target = "relay",
						client = %downlink.label,
						"Dropping response for closed downlink"
					);
				}
			}
			Some(Pending::Control(tx)) => {
				let reply = match error {
					Some(message) => Err(message),
					None => Ok(result.unwrap_or(Value::Null)),
				};
				let _ = tx.send(reply);
			}
		}
	}

	/// Routes an uplink event: session-tagged events go only to the owning
	/// downlink (unowned ones are dropped), session-less events are
	/// broadcast to every downlink.
	pub fn route_event(&self, event: &ForwardedEvent) {
		let frame = text(client_event(event));
		match &event.session_id {
			Some(sid) => match self.sessions.get(sid).and_then(|conn| self.downlinks.get(conn)) {
				Some(downlink) => {
					let _ = downlink.tx.send(frame);
				}
				None => {
					debug!(
						target = "relay",
						session = %sid,
						event = %event.method,
						"Dropping event for unowned session"
					);
				}
			},
			None => {
				for downlink in self.downlinks.values() {
					let _ = downlink.tx.send(frame.clone());
				}
			}
		}
	}

	fn allocate_uplink_id(&mut self) -> u64 {
		self.next_uplink_id += 1;
		self.next_uplink_id
	}
}

pub(crate) fn text(value: Value) -> Message {
	Message::Text(value.to_string().into())
}
