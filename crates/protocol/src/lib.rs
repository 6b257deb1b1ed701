//! Wire types for the extension relay protocol.
//!
//! Everything that crosses a relay WebSocket is a JSON object matching one
//! of the shapes defined here. The uplink (browser extension) side is
//! decoded through [`UplinkMessage::parse`], the downlink (automation
//! client) side through [`ClientCommand`]. Recording control rides the same
//! transport with its own typed parameters in [`recording`].

mod envelope;
pub mod recording;

pub use envelope::{
	ClientCommand, EnvelopeError, ForwardedEvent, UplinkMessage, client_event, client_response,
	forward_command, ping,
};
pub use recording::{RecordingChunk, RecordingControl, RecordingParams};

/// Default host the relay binds to.
pub const RELAY_HOST: &str = "127.0.0.1";

/// Default port the relay binds to; the extension's background worker dials
/// `ws://127.0.0.1:19988/extension`.
pub const RELAY_PORT: u16 = 19988;
