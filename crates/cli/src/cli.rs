use std::time::Duration;

use clap::Parser;

use tabrelay::RelayConfig;
use tabrelay::config::DEFAULT_EXTENSION_ORIGIN;

/// Relay between automation clients and the browser-extension debugging
/// uplink.
#[derive(Debug, Parser)]
#[command(name = "tabrelay", version, about)]
pub struct Cli {
	/// Address to bind the relay listener to.
	#[arg(long, default_value = "127.0.0.1")]
	pub host: String,

	/// Port for the WebSocket and recording-control listener.
	#[arg(long, default_value_t = 19988)]
	pub port: u16,

	/// Require this token (as `?token=...`) on client connections.
	#[arg(long, env = "TABRELAY_TOKEN")]
	pub token: Option<String>,

	/// Extension origin allowed on the uplink path; repeatable.
	#[arg(long = "allow-origin", value_name = "ORIGIN")]
	pub allow_origins: Vec<String>,

	/// Seconds between heartbeat pings to the extension.
	#[arg(long, default_value_t = 15)]
	pub heartbeat_interval: u64,

	/// Seconds without a pong before the uplink is considered stale.
	#[arg(long, default_value_t = 40)]
	pub heartbeat_timeout: u64,

	/// Increase log verbosity (-v: info, -vv: debug).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}

impl Cli {
	pub fn relay_config(&self) -> RelayConfig {
		let allowed_origins = if self.allow_origins.is_empty() {
			vec![DEFAULT_EXTENSION_ORIGIN.to_string()]
		} else {
			self.allow_origins.clone()
		};
		RelayConfig {
			host: self.host.clone(),
			port: self.port,
			auth_token: self.token.clone(),
			allowed_origins,
			heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
			heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
		}
	}
}
