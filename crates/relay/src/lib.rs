//! Relay between automation clients and a privileged browser-extension
//! debugging connection.
//!
//! The extension holds the only real debugger channel, so every client
//! shares one physical uplink. The relay terminates any number of downlink
//! WebSockets, remaps their self-chosen request ids onto uplink-scoped ids,
//! routes session-tagged events back to the owning downlink, and runs the
//! tab-capture recording state machine over the same transport.
//!
//! All shared state lives in a single [`state::RelayState`] behind one
//! mutex; each connection gets a reader task and an unbounded writer pump,
//! so no connection ever blocks on another's I/O.

pub mod config;
pub mod error;
pub mod server;

mod downlink;
mod recording;
mod state;
mod uplink;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use server::{RelayServer, run_relay_server};
