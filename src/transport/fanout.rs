//! C6's missing half: the background task that turns `SessionRegistry`
//! change events into `McpSessionTable` fan-out (spec §4.6). Lives here,
//! not in `mcp::notify`, because it needs both the registry and the MCP
//! session table and neither owns the other.

use crate::mcp::notify::{McpSessionEntry, NotificationKind};
use crate::session::registry::ChangeEvent;
use crate::{info, warn, Arc, AppState};

/// Whether `entry`'s resolved scope includes `session_id`. Bearer-scoped
/// entries resolve the same way C4 does; query-scoped entries are pinned
/// to their query's origin session for the query's lifetime.
fn in_scope(state: &AppState, entry: &McpSessionEntry, session_id: &str) -> bool {
	if let Some(token) = &entry.auth_token {
		return state.registry.find_by_auth(token).iter().any(|s| s.read().id == session_id);
	}
	if let Some(query_id) = &entry.query_id {
		if let Some(query) = state.queries.get(query_id) {
			return query.origin_session_id == session_id;
		}
	}
	false
}

/// Drive the fan-out for as long as `state` lives. Spawned once at
/// startup; exits only if the registry's broadcast channel is dropped
/// (i.e. the process is shutting down).
pub async fn run(state: Arc<AppState>) {
	let mut events = state.registry.subscribe();
	loop {
		let event = match events.recv().await {
			Ok(event) => event,
			Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
				warn!(skipped = n, "fan-out lagged behind session registry events");
				continue;
			},
			Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
		};

		let (kind, session_id) = match &event {
			ChangeEvent::SessionAttached { session_id, .. } | ChangeEvent::SessionDetached { session_id, .. } => {
				(NotificationKind::ToolsListChanged, session_id.clone())
			},
			ChangeEvent::ToolAdded { session_id, .. } | ChangeEvent::ToolRemoved { session_id, .. } => {
				(NotificationKind::ToolsListChanged, session_id.clone())
			},
			ChangeEvent::ResourceAdded { session_id, .. } | ChangeEvent::ResourceRemoved { session_id, .. } => {
				(NotificationKind::ResourcesListChanged, session_id.clone())
			},
		};

		state.mcp_sessions.notify_affected(kind, &session_id, |entry| in_scope(&state, entry, &session_id));
	}
	info!("fan-out task stopped, registry event channel closed");
}
