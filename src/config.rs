//! Process configuration: CLI flags with `BRIDGE_`-prefixed environment
//! variable fallbacks, using typed `clap`-derived config rather than ad
//! hoc env var parsing scattered through the code.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

#[derive(Parser, Debug, Clone)]
#[command(name = "bridged", version, about = "MCP session bridge")]
pub struct Config {
	/// Address the bridge listens on for both frontend duplex channels
	/// and MCP consumer HTTP.
	#[arg(long, env = "BRIDGE_BIND", default_value = "0.0.0.0:3000")]
	pub bind: SocketAddr,

	/// Base URL a created Query is PUT to. Absent is not a startup error;
	/// queries simply fail with InternalError until configured.
	#[arg(long, env = "BRIDGE_AGENT_URL")]
	pub agent_url: Option<String>,

	/// PendingCall deadline in seconds, clamped to [1, 300].
	#[arg(long, env = "BRIDGE_CALL_TIMEOUT_SECS", default_value_t = 30)]
	pub call_timeout_secs: u64,

	/// Retention window for terminal queries, in seconds, before they are
	/// pruned (spec §4.7's open question; resolved here as a default).
	#[arg(long, env = "BRIDGE_QUERY_RETENTION_SECS", default_value_t = 300)]
	pub query_retention_secs: u64,

	/// Grace period for in-flight requests during shutdown, in seconds.
	#[arg(long, env = "BRIDGE_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
	pub shutdown_grace_secs: u64,

	#[arg(long, env = "BRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
	pub log_format: LogFormat,

	/// Increase log verbosity; repeatable (-v, -vv, -vvv).
	#[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
	pub verbose: u8,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
	Pretty,
	Json,
}

impl Config {
	pub fn call_timeout(&self) -> Duration {
		Duration::from_secs(self.call_timeout_secs.clamp(1, 300))
	}

	pub fn query_retention(&self) -> Duration {
		Duration::from_secs(self.query_retention_secs.max(1))
	}

	pub fn shutdown_grace(&self) -> Duration {
		Duration::from_secs(self.shutdown_grace_secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn call_timeout_is_clamped() {
		let mut cfg = Config::parse_from(["bridged"]);
		cfg.call_timeout_secs = 10_000;
		assert_eq!(cfg.call_timeout(), Duration::from_secs(300));
		cfg.call_timeout_secs = 0;
		assert_eq!(cfg.call_timeout(), Duration::from_secs(1));
	}

	#[test]
	fn defaults_parse() {
		let cfg = Config::parse_from(["bridged"]);
		assert_eq!(cfg.bind.port(), 3000);
		assert!(cfg.agent_url.is_none());
	}
}
