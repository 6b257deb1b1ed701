use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
	/// No extension uplink is connected. Synthesized immediately, never
	/// queued.
	#[error("extension not connected")]
	UplinkUnavailable,

	/// Recording operation illegal in the current state. Crosses the HTTP
	/// boundary as `{success:false}`, never as a 5xx.
	#[error("{0}")]
	RecordingState(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
