//! Per-request span helper: opens one `tracing` span per inbound request
//! carrying the fields a reader needs to correlate a JSON-RPC call with
//! the session/query/MCP-session it addressed, as structured fields
//! rather than interpolated message text.

use tracing::Span;

/// Open a span for one inbound request. `kind` is a short label
/// ("tools/call", "resources/read", "query:progress", ...).
pub fn request_span(kind: &str) -> Span {
	tracing::info_span!(
		"request",
		kind = %kind,
		session_id = tracing::field::Empty,
		mcp_session_id = tracing::field::Empty,
		query_id = tracing::field::Empty,
		tool = tracing::field::Empty,
	)
}

pub fn record_session(span: &Span, session_id: &str) {
	span.record("session_id", session_id);
}

pub fn record_mcp_session(span: &Span, mcp_session_id: &str) {
	span.record("mcp_session_id", mcp_session_id);
}

pub fn record_query(span: &Span, query_id: &str) {
	span.record("query_id", query_id);
}

pub fn record_tool(span: &Span, tool: &str) {
	span.record("tool", tool);
}
