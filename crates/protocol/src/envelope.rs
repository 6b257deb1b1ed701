//! Message envelopes shared by every relay connection.
//!
//! The protocol is a closed set of JSON shapes discriminated by the presence
//! of an `id` field and then by `method`:
//!
//! 1. A downlink client sends a [`ClientCommand`] with a self-chosen `id`
//! 2. The relay wraps it via [`forward_command`] under an uplink-scoped id
//! 3. The extension answers with a response (`id` present) or pushes an
//!    event / log / recording message (`id` absent)
//! 4. [`UplinkMessage::parse`] is the single decode boundary for everything
//!    the extension sends
//!
//! Command and event payloads are opaque to the relay: `method` and `params`
//! are forwarded untouched in both directions.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::recording::RecordingChunk;

/// Malformed or unrecognized envelope. Always a protocol anomaly for the
/// relay (logged and dropped), never fatal.
#[derive(Debug, Error)]
pub enum EnvelopeError {
	#[error("invalid json: {0}")]
	Json(#[from] serde_json::Error),

	#[error("message is not a json object")]
	NotAnObject,

	#[error("push message missing method")]
	MissingMethod,

	#[error("unknown method: {0}")]
	UnknownMethod(String),

	#[error("{method} missing params")]
	MissingParams { method: &'static str },
}

/// Command received from a downlink client, in raw debugging-protocol shape.
///
/// `method` and `params` are opaque blobs; the relay only reads `id` (for
/// remapping) and `sessionId` (for routing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientCommand {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Event forwarded from the extension, addressed by optional session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardedEvent {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Everything the uplink can send, decoded exhaustively in one place.
#[derive(Debug, Clone)]
pub enum UplinkMessage {
	/// Terminal answer to an id-bearing message the relay sent.
	Response {
		id: u64,
		result: Option<Value>,
		error: Option<String>,
	},
	/// Debugging-protocol event to be routed to downlinks.
	Event(ForwardedEvent),
	/// Diagnostic log line from the extension.
	Log { level: String, args: Vec<Value> },
	/// Heartbeat reply.
	Pong,
	/// Recorded tab-capture data chunk.
	RecordingData(RecordingChunk),
	/// The extension unilaterally aborted the recording (e.g. tab closed).
	RecordingCancelled { tab_id: i64 },
}

impl UplinkMessage {
	/// Decodes one raw uplink frame.
	///
	/// A message with an `id` is a response regardless of any other fields;
	/// anything else must carry a recognized `method`.
	pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
		let value: Value = serde_json::from_str(raw)?;
		if !value.is_object() {
			return Err(EnvelopeError::NotAnObject);
		}

		if let Some(id) = value.get("id").and_then(Value::as_u64) {
			let error = value.get("error").map(error_message);
			let result = if error.is_none() {
				Some(value.get("result").cloned().unwrap_or(Value::Null))
			} else {
				None
			};
			return Ok(Self::Response { id, result, error });
		}

		let method = value
			.get("method")
			.and_then(Value::as_str)
			.ok_or(EnvelopeError::MissingMethod)?;

		match method {
			"pong" => Ok(Self::Pong),
			"log" => {
				let params = value.get("params").cloned().unwrap_or(Value::Null);
				let level = params
					.get("level")
					.and_then(Value::as_str)
					.unwrap_or("info")
					.to_string();
				let args = params
					.get("args")
					.and_then(Value::as_array)
					.cloned()
					.unwrap_or_default();
				Ok(Self::Log { level, args })
			}
			"forwardCDPEvent" => {
				let params = value
					.get("params")
					.cloned()
					.ok_or(EnvelopeError::MissingParams {
						method: "forwardCDPEvent",
					})?;
				Ok(Self::Event(serde_json::from_value(params)?))
			}
			"recordingData" => {
				let params = value
					.get("params")
					.cloned()
					.ok_or(EnvelopeError::MissingParams {
						method: "recordingData",
					})?;
				Ok(Self::RecordingData(serde_json::from_value(params)?))
			}
			"recordingCancelled" => {
				let tab_id = value
					.get("params")
					.and_then(|p| p.get("tabId"))
					.and_then(Value::as_i64)
					.ok_or(EnvelopeError::MissingParams {
						method: "recordingCancelled",
					})?;
				Ok(Self::RecordingCancelled { tab_id })
			}
			other => Err(EnvelopeError::UnknownMethod(other.to_string())),
		}
	}
}

/// Extensions report errors either as a bare string or as `{message}`.
fn error_message(error: &Value) -> String {
	if let Some(s) = error.as_str() {
		return s.to_string();
	}
	error
		.get("message")
		.and_then(Value::as_str)
		.map(str::to_owned)
		.unwrap_or_else(|| error.to_string())
}

/// Wraps a client command for the uplink under a relay-assigned id.
///
/// `client` is a provenance label only; the extension ignores it.
pub fn forward_command(uplink_id: u64, client: &str, cmd: &ClientCommand) -> Value {
	json!({
		"id": uplink_id,
		"method": "forwardCDPCommand",
		"clientId": client,
		"params": {
			"method": cmd.method,
			"params": cmd.params,
			"sessionId": cmd.session_id,
		}
	})
}

/// Builds the response frame delivered back to a downlink, under the
/// client's original id.
pub fn client_response(
	id: u64,
	session_id: Option<&str>,
	outcome: Result<Value, &str>,
) -> Value {
	match outcome {
		Ok(result) => json!({
			"id": id,
			"sessionId": session_id,
			"result": result,
		}),
		Err(message) => json!({
			"id": id,
			"sessionId": session_id,
			"error": { "message": message },
		}),
	}
}

/// Builds the event frame delivered to downlinks. `sessionId` is omitted
/// entirely for session-less events.
pub fn client_event(event: &ForwardedEvent) -> Value {
	match &event.session_id {
		Some(sid) => json!({
			"sessionId": sid,
			"method": event.method,
			"params": event.params,
		}),
		None => json!({
			"method": event.method,
			"params": event.params,
		}),
	}
}

/// Heartbeat probe sent toward the uplink.
pub fn ping() -> Value {
	json!({ "method": "ping" })
}
