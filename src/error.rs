//! Stable, language-agnostic error codes (spec §7) as a single `thiserror`
//! enum. Each variant knows how to shape itself as a JSON-RPC error object
//! or an HTTP status, so C5 and the query HTTP endpoints share one source
//! of truth for error surfacing.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
	#[error("no bearer token and no query scope on request")]
	MissingAuthentication,

	#[error("bearer token matched no live session")]
	InvalidAuthentication,

	#[error("bearer token matched more than one session; _meta.sessionId required")]
	SessionNotSpecified { available_sessions: Vec<Value> },

	#[error("session '{0}' is not live")]
	SessionNotFound(String),

	#[error("session name '{0}' is already in use")]
	SessionNameAlreadyInUse(String),

	#[error("tool '{name}' not found on the resolved session")]
	ToolNotFound {
		name: String,
		available_tools: Vec<String>,
	},

	#[error("tool '{0}' is outside the query's allowlist")]
	ToolNotAllowed(String),

	#[error("tool '{name}' schema conflicts with an existing sibling session's tool")]
	ToolSchemaConflict { name: String, details: String },

	#[error("query '{0}' not found")]
	QueryNotFound(String),

	#[error("query '{0}' already reached a terminal state")]
	QueryCompleted(String),

	#[error("call timed out waiting for the frontend")]
	Timeout,

	#[error("SSE consumer fell behind and was disconnected")]
	SlowConsumer,

	#[error("internal error: {0}")]
	InternalError(String),
}

impl BridgeError {
	/// JSON-RPC error `code` for this variant. MCP reserves -32000..-32099
	/// for server-defined errors; standard JSON-RPC codes are used where
	/// they map naturally (e.g. invalid request shape).
	pub fn json_rpc_code(&self) -> i64 {
		match self {
			BridgeError::MissingAuthentication => -32001,
			BridgeError::InvalidAuthentication => -32002,
			BridgeError::SessionNotSpecified { .. } => -32003,
			BridgeError::SessionNotFound(_) => -32004,
			BridgeError::SessionNameAlreadyInUse(_) => -32005,
			BridgeError::ToolNotFound { .. } => -32006,
			BridgeError::ToolNotAllowed(_) => -32007,
			BridgeError::ToolSchemaConflict { .. } => -32008,
			BridgeError::QueryNotFound(_) => -32009,
			BridgeError::QueryCompleted(_) => -32010,
			BridgeError::Timeout => -32011,
			BridgeError::SlowConsumer => -32012,
			BridgeError::InternalError(_) => -32603,
		}
	}

	/// Structured `data` payload carried alongside the JSON-RPC error,
	/// per the per-code "Where surfaced" column in spec §7.
	pub fn json_rpc_data(&self) -> Option<Value> {
		match self {
			BridgeError::SessionNotSpecified { available_sessions } => Some(json!({
				"available_sessions": available_sessions,
			})),
			BridgeError::ToolNotFound {
				available_tools, ..
			} => Some(json!({ "available_tools": available_tools })),
			BridgeError::ToolSchemaConflict { name, details } => Some(json!({
				"tool": name,
				"details": details,
			})),
			_ => None,
		}
	}

	pub fn to_json_rpc_error(&self) -> Value {
		json!({
			"code": self.json_rpc_code(),
			"message": self.to_string(),
			"data": self.json_rpc_data(),
		})
	}

	/// HTTP status for the query lifecycle endpoints (spec §6/§7).
	pub fn http_status(&self) -> http::StatusCode {
		use http::StatusCode;
		match self {
			BridgeError::QueryNotFound(_) => StatusCode::NOT_FOUND,
			BridgeError::QueryCompleted(_) => StatusCode::CONFLICT,
			BridgeError::MissingAuthentication | BridgeError::InvalidAuthentication => {
				StatusCode::UNAUTHORIZED
			},
			BridgeError::SessionNotFound(_) => StatusCode::NOT_FOUND,
			BridgeError::ToolNotAllowed(_) | BridgeError::ToolNotFound { .. } => {
				StatusCode::BAD_REQUEST
			},
			BridgeError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
			_ => StatusCode::BAD_REQUEST,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tool_not_found_carries_available_tools() {
		let e = BridgeError::ToolNotFound {
			name: "greet".into(),
			available_tools: vec!["other".into()],
		};
		let data = e.json_rpc_data().unwrap();
		assert_eq!(data["available_tools"][0], "other");
	}

	#[test]
	fn query_completed_maps_to_409() {
		let e = BridgeError::QueryCompleted("q1".into());
		assert_eq!(e.http_status(), http::StatusCode::CONFLICT);
	}

	#[test]
	fn query_not_found_maps_to_404() {
		let e = BridgeError::QueryNotFound("q1".into());
		assert_eq!(e.http_status(), http::StatusCode::NOT_FOUND);
	}
}
