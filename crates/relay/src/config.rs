use std::time::Duration;

use tabrelay_protocol::{RELAY_HOST, RELAY_PORT};

/// Origin of the stock extension build, accepted when no explicit allow-list
/// is configured.
pub const DEFAULT_EXTENSION_ORIGIN: &str = "chrome-extension://jfkcjnbdmgkbjbgoifkaaalbnenjicbo";

/// Relay listener and policy configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
	pub host: String,
	pub port: u16,
	/// When set, downlink upgrades must carry `?token=<value>`.
	pub auth_token: Option<String>,
	/// Origins allowed to open the extension uplink path.
	pub allowed_origins: Vec<String>,
	pub heartbeat_interval: Duration,
	pub heartbeat_timeout: Duration,
}

impl Default for RelayConfig {
	fn default() -> Self {
		Self {
			host: RELAY_HOST.to_string(),
			port: RELAY_PORT,
			auth_token: None,
			allowed_origins: vec![DEFAULT_EXTENSION_ORIGIN.to_string()],
			heartbeat_interval: Duration::from_secs(15),
			heartbeat_timeout: Duration::from_secs(40),
		}
	}
}

impl RelayConfig {
	pub fn origin_allowed(&self, origin: &str) -> bool {
		self.allowed_origins.iter().any(|allowed| allowed == origin)
	}

	pub fn token_accepted(&self, presented: Option<&str>) -> bool {
		match &self.auth_token {
			Some(expected) => presented == Some(expected.as_str()),
			None => true,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn origin_match_is_exact() {
		let config = RelayConfig::default();
		assert!(config.origin_allowed(DEFAULT_EXTENSION_ORIGIN));
		assert!(!config.origin_allowed("http://evil.example"));
		assert!(!config.origin_allowed("chrome-extension://other"));
	}

	#[test]
	fn token_is_optional_until_configured() {
		let mut config = RelayConfig::default();
		assert!(config.token_accepted(None));

		config.auth_token = Some("s3cret".into());
		assert!(!config.token_accepted(None));
		assert!(!config.token_accepted(Some("wrong")));
		assert!(config.token_accepted(Some("s3cret")));
	}
}
