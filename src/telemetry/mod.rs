//! Tracing setup and structured per-request logging, modeled on the
//! teacher's `telemetry::log` / `mcp::handler::setup_request_log` split:
//! a process-wide subscriber installed once at startup, and a per-request
//! helper that opens a span carrying the routing fields a reader needs to
//! correlate a JSON-RPC call with the session/query it touched.

pub mod log;

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

/// Install the global tracing subscriber. Call once, at process start.
pub fn init(config: &Config) {
	let default_level = match config.verbose {
		0 => "info",
		1 => "debug",
		_ => "trace",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
	match config.log_format {
		LogFormat::Pretty => subscriber.init(),
		LogFormat::Json => subscriber.json().init(),
	}
}
