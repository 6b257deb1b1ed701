//! Wire types for the tab-capture recording sub-protocol.
//!
//! Recording control messages are id-correlated like forwarded commands but
//! carry their own typed methods (`startRecording`, `stopRecording`,
//! `cancelRecording`). Recorded data flows back as base64-encoded
//! `recordingData` pushes, the last of which is flagged `final`.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Capture parameters sent with `startRecording`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingParams {
	/// Tab to capture; the extension records the active tab when omitted.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tab_id: Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub frame_rate: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub video_bitrate: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub audio_bitrate: Option<u32>,
	#[serde(default)]
	pub audio: bool,
}

/// One recorded data chunk pushed by the extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingChunk {
	pub tab_id: i64,
	/// Base64-encoded media bytes.
	pub data: String,
	/// Set on the last chunk of a recording.
	#[serde(rename = "final", default)]
	pub is_final: bool,
}

impl RecordingChunk {
	pub fn decode_data(&self) -> Result<Vec<u8>, base64::DecodeError> {
		BASE64.decode(&self.data)
	}

	/// Encodes raw media bytes into chunk form (used by extension shims and
	/// tests).
	pub fn from_bytes(tab_id: i64, bytes: &[u8], is_final: bool) -> Self {
		Self {
			tab_id,
			data: BASE64.encode(bytes),
			is_final,
		}
	}
}

/// Control operation sent to the uplink over the shared transport.
#[derive(Debug, Clone)]
pub enum RecordingControl {
	Start(RecordingParams),
	Stop,
	Cancel,
}

impl RecordingControl {
	pub fn method(&self) -> &'static str {
		match self {
			Self::Start(_) => "startRecording",
			Self::Stop => "stopRecording",
			Self::Cancel => "cancelRecording",
		}
	}

	/// Builds the id-correlated wire frame for this operation.
	pub fn into_message(self, id: u64) -> Value {
		let method = self.method();
		let params = match self {
			Self::Start(params) => {
				serde_json::to_value(params).expect("RecordingParams is always serializable")
			}
			Self::Stop | Self::Cancel => json!({}),
		};
		json!({
			"id": id,
			"method": method,
			"params": params,
		})
	}
}
