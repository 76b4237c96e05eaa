//! Shared process state threaded through every transport-layer handler.
//! Kept as its own module (rather than folded into `transport`) so `query`
//! and `mcp` can reference it without a dependency cycle on `transport`.

use serde_json::Value;

use crate::mcp::notify::McpSessionTable;
use crate::query::QueryEngine;
use crate::session::{FrontendOutbox, PendingCallTable, SessionRegistry};
use crate::{Arc, Config};

pub struct AppState {
	pub config: Config,
	pub registry: Arc<SessionRegistry>,
	pub pending: Arc<PendingCallTable>,
	pub outbox: Arc<FrontendOutbox>,
	pub queries: Arc<QueryEngine>,
	pub mcp_sessions: Arc<McpSessionTable>,
	/// Fires once at shutdown (spec §5) so every live `FrontendLink` can
	/// close its socket with `GoingAway` instead of just dropping.
	pub shutdown: Arc<tokio::sync::Notify>,
}

impl AppState {
	pub fn new(config: Config) -> Arc<Self> {
		let registry = Arc::new(SessionRegistry::new());
		let pending = PendingCallTable::new();
		let outbox = FrontendOutbox::new();
		let queries = QueryEngine::new(config.agent_url.clone(), config.query_retention(), registry.clone());
		queries.bind_outbox(outbox.clone());
		let mcp_sessions = McpSessionTable::new();

		Arc::new(Self {
			config,
			registry,
			pending,
			outbox,
			queries,
			mcp_sessions,
			shutdown: Arc::new(tokio::sync::Notify::new()),
		})
	}

	pub fn config_payload(&self) -> Value {
		serde_json::json!({
			"name": crate::SERVER_NAME,
			"description": "Bridges frontend UI sessions and MCP consumers behind one endpoint.",
			"version": crate::SERVER_VERSION,
		})
	}
}
