//! C5 — MCP Request Handler (spec §4.5).
//!
//! One dispatch core shared by both wire formats (legacy proxy POST and
//! Streamable-HTTP POST); `transport` picks which envelope to read the
//! request from and which to write the response into, but the JSON-RPC
//! method dispatch, scope resolution, and tool/resource routing all happen
//! here.

use std::collections::HashSet;

use serde_json::{json, Value};

use crate::mcp::auth::{self, ScopeDecision, ToolAllowlist};
use crate::mcp::wire;
use crate::session::link::OutboundMessage;
use crate::session::pending::{PendingCallKind, PendingOutcome};
use crate::session::registry::{Session, ToolEntry};
use crate::{Arc, AppState, BridgeError, SERVER_NAME, SERVER_VERSION};
use parking_lot::RwLock;

/// Resolve a `ScopeDecision` down to exactly one candidate session, for the
/// operations (`tools/call`, `resources/read`, `prompts/get`) that require
/// one. `NeedSessionChoice` and a multi-candidate `Authenticated` both
/// surface as `SessionNotSpecified` here (spec §7).
fn resolve_single(decision: ScopeDecision) -> Result<(Arc<RwLock<Session>>, Option<ToolAllowlist>, Option<String>), BridgeError> {
	match decision {
		ScopeDecision::Authenticated { mut candidates } if candidates.len() == 1 => Ok((candidates.remove(0), None, None)),
		ScopeDecision::Authenticated { candidates } => Err(BridgeError::SessionNotSpecified {
			available_sessions: auth::available_sessions(&candidates),
		}),
		ScopeDecision::NeedSessionChoice { candidates } => Err(BridgeError::SessionNotSpecified {
			available_sessions: auth::available_sessions(&candidates),
		}),
		ScopeDecision::QueryScoped {
			query_id,
			candidate,
			allowlist,
		} => Ok((candidate, Some(allowlist), Some(query_id))),
		ScopeDecision::Rejected(e) => Err(e),
	}
}

fn synthetic_list_sessions_tool() -> Value {
	json!({
		"name": "list_sessions",
		"description": "List the frontend sessions currently visible to this request's scope.",
		"inputSchema": {"type": "object", "properties": {}},
	})
}

fn tool_to_json(tool: &ToolEntry) -> Value {
	let mut v = json!({
		"name": tool.name,
		"description": tool.description,
	});
	if let Some(schema) = &tool.input_schema {
		v["inputSchema"] = schema.clone();
	}
	if let Some(schema) = &tool.output_schema {
		v["outputSchema"] = schema.clone();
	}
	if let Some(meta) = &tool.meta {
		v["_meta"] = meta.clone();
	}
	v
}

pub async fn dispatch(state: &Arc<AppState>, decision: ScopeDecision, req: wire::JsonRpcRequest) -> Value {
	if let ScopeDecision::Rejected(e) = &decision {
		return wire::error(&req.id, e);
	}
	match req.method.as_str() {
		"initialize" => handle_initialize(&req.id),
		"tools/list" => handle_tools_list(&req.id, decision),
		"tools/call" => handle_tools_call(state, &req.id, decision, req.params).await,
		"resources/list" => handle_resources_list(&req.id, decision),
		"resources/read" => handle_resource_read(state, &req.id, decision, req.params).await,
		"prompts/list" => handle_prompts_list(&req.id, decision),
		"prompts/get" => handle_prompt_get(&req.id, decision, req.params),
		other => wire::error(&req.id, &BridgeError::InternalError(format!("unsupported method '{other}'"))),
	}
}

fn handle_initialize(id: &Value) -> Value {
	wire::success(
		id,
		json!({
			"protocolVersion": "2025-06-18",
			"capabilities": {
				"tools": {"listChanged": true},
				"resources": {"listChanged": true},
				"prompts": {"listChanged": true},
			},
			"serverInfo": {"name": SERVER_NAME, "version": SERVER_VERSION},
		}),
	)
}

fn handle_tools_list(id: &Value, decision: ScopeDecision) -> Value {
	match decision {
		ScopeDecision::Rejected(e) => wire::error(id, &e),
		ScopeDecision::NeedSessionChoice { candidates } => wire::success(
			id,
			wire::list_result_with_choice("tools", json!([synthetic_list_sessions_tool()]), auth::available_sessions(&candidates)),
		),
		ScopeDecision::Authenticated { candidates } => {
			let mut tools = vec![synthetic_list_sessions_tool()];
			let mut seen = HashSet::new();
			for c in &candidates {
				for t in c.read().tools.values() {
					if seen.insert(t.name.clone()) {
						tools.push(tool_to_json(t));
					}
				}
			}
			wire::success(id, json!({ "tools": tools }))
		},
		ScopeDecision::QueryScoped { candidate, allowlist, .. } => {
			let mut tools = vec![synthetic_list_sessions_tool()];
			for t in candidate.read().tools.values() {
				if allowlist.allows(&t.name) {
					tools.push(tool_to_json(t));
				}
			}
			wire::success(id, json!({ "tools": tools }))
		},
	}
}

async fn handle_tools_call(state: &Arc<AppState>, id: &Value, decision: ScopeDecision, params: Value) -> Value {
	if let Some(name) = params.get("name").and_then(Value::as_str) {
		if name == "list_sessions" {
			return handle_list_sessions(state, id, decision);
		}
	}

	let (session, allowlist, query_id) = match resolve_single(decision) {
		Ok(v) => v,
		Err(e) => return wire::error(id, &e),
	};
	let name = params.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
	let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

	if let Some(allowlist) = &allowlist {
		if !allowlist.allows(&name) {
			return wire::error(id, &BridgeError::ToolNotAllowed(name));
		}
	}

	let (session_id, tool_known) = {
		let s = session.read();
		(s.id.clone(), s.tools.contains_key(&name))
	};
	if !tool_known {
		let available_tools = session.read().tools.keys().cloned().collect();
		return wire::error(id, &BridgeError::ToolNotFound { name, available_tools });
	}

	let (request_id, rx) = state.pending.register(&session_id, PendingCallKind::ToolCall, state.config.call_timeout());
	if state
		.outbox
		.send(
			&session_id,
			OutboundMessage::ToolCall {
				request_id,
				name: name.clone(),
				arguments: arguments.clone(),
			},
		)
		.is_err()
	{
		return wire::error(id, &BridgeError::SessionNotFound(session_id));
	}

	let outcome = rx.await.unwrap_or(PendingOutcome::SessionGone);
	let result = match outcome {
		PendingOutcome::Ok(v) => v,
		PendingOutcome::Err(e) => return wire::error(id, &BridgeError::InternalError(e)),
		PendingOutcome::Timeout => return wire::error(id, &BridgeError::Timeout),
		PendingOutcome::SessionGone => return wire::error(id, &BridgeError::SessionNotFound(session_id)),
	};

	if let Some(query_id) = &query_id {
		state.queries.record_tool_call(query_id, &name, arguments.clone(), result.clone());
		let is_response_tool = state
			.queries
			.get(query_id)
			.map(|q| q.response_tool.as_deref() == Some(name.as_str()))
			.unwrap_or(false);
		if is_response_tool {
			// Atomic with the call per spec §4.5: the caller gets this
			// result *and* the query is marked complete in the same
			// dispatch, with the arguments as the canonical response.
			let _ = state.queries.complete(query_id, arguments.clone());
		}
	}

	wire::success(id, content_wrap(result))
}

fn handle_list_sessions(state: &Arc<AppState>, id: &Value, decision: ScopeDecision) -> Value {
	let candidates = match decision {
		ScopeDecision::Authenticated { candidates } => candidates,
		ScopeDecision::NeedSessionChoice { candidates } => candidates,
		ScopeDecision::QueryScoped { candidate, .. } => vec![candidate],
		ScopeDecision::Rejected(e) => return wire::error(id, &e),
	};
	let _ = state;
	wire::success(id, content_wrap(json!({ "sessions": auth::available_sessions(&candidates) })))
}

fn handle_resources_list(id: &Value, decision: ScopeDecision) -> Value {
	match decision {
		ScopeDecision::Rejected(e) => wire::error(id, &e),
		ScopeDecision::NeedSessionChoice { candidates } => wire::success(
			id,
			wire::list_result_with_choice("resources", json!([]), auth::available_sessions(&candidates)),
		),
		ScopeDecision::Authenticated { candidates } => {
			let mut resources = Vec::new();
			let mut seen = HashSet::new();
			for c in &candidates {
				for r in c.read().resources.values() {
					if seen.insert(r.uri.clone()) {
						resources.push(json!({
							"uri": r.uri, "name": r.name, "description": r.description, "mimeType": r.mime_type,
						}));
					}
				}
			}
			wire::success(id, json!({ "resources": resources }))
		},
		ScopeDecision::QueryScoped { candidate, .. } => {
			let resources: Vec<Value> = candidate
				.read()
				.resources
				.values()
				.map(|r| json!({"uri": r.uri, "name": r.name, "description": r.description, "mimeType": r.mime_type}))
				.collect();
			wire::success(id, json!({ "resources": resources }))
		},
	}
}

async fn handle_resource_read(state: &Arc<AppState>, id: &Value, decision: ScopeDecision, params: Value) -> Value {
	let (session, _allowlist, _query_id) = match resolve_single(decision) {
		Ok(v) => v,
		Err(e) => return wire::error(id, &e),
	};
	let uri = params.get("uri").and_then(Value::as_str).unwrap_or_default().to_string();

	let (session_id, known) = {
		let s = session.read();
		(s.id.clone(), s.resources.contains_key(&uri))
	};
	if !known {
		return wire::error(id, &BridgeError::ToolNotFound {
			name: uri,
			available_tools: session.read().resources.keys().cloned().collect(),
		});
	}

	let (request_id, rx) = state.pending.register(&session_id, PendingCallKind::ResourceRead, state.config.call_timeout());
	if state
		.outbox
		.send(&session_id, OutboundMessage::ResourceRead { request_id, uri })
		.is_err()
	{
		return wire::error(id, &BridgeError::SessionNotFound(session_id));
	}

	match rx.await.unwrap_or(PendingOutcome::SessionGone) {
		PendingOutcome::Ok(v) => wire::success(id, content_wrap(v)),
		PendingOutcome::Err(e) => wire::error(id, &BridgeError::InternalError(e)),
		PendingOutcome::Timeout => wire::error(id, &BridgeError::Timeout),
		PendingOutcome::SessionGone => wire::error(id, &BridgeError::SessionNotFound(session_id)),
	}
}

fn handle_prompts_list(id: &Value, decision: ScopeDecision) -> Value {
	match decision {
		ScopeDecision::Rejected(e) => wire::error(id, &e),
		ScopeDecision::NeedSessionChoice { candidates } => wire::success(
			id,
			wire::list_result_with_choice("prompts", json!([]), auth::available_sessions(&candidates)),
		),
		ScopeDecision::Authenticated { candidates } => {
			let mut prompts = Vec::new();
			let mut seen = HashSet::new();
			for c in &candidates {
				for p in c.read().prompts.values() {
					if seen.insert(p.name.clone()) {
						prompts.push(json!({"name": p.name, "description": p.description, "arguments": p.arguments}));
					}
				}
			}
			wire::success(id, json!({ "prompts": prompts }))
		},
		ScopeDecision::QueryScoped { candidate, .. } => {
			let prompts: Vec<Value> = candidate
				.read()
				.prompts
				.values()
				.map(|p| json!({"name": p.name, "description": p.description, "arguments": p.arguments}))
				.collect();
			wire::success(id, json!({ "prompts": prompts }))
		},
	}
}

/// Prompts are read-only from the bridge's perspective (spec §3): unlike
/// tools/resources there's no round-trip to the frontend, so this answers
/// straight from the stored `PromptEntry` rather than going through C3/C2.
fn handle_prompt_get(id: &Value, decision: ScopeDecision, params: Value) -> Value {
	let (session, _allowlist, _query_id) = match resolve_single(decision) {
		Ok(v) => v,
		Err(e) => return wire::error(id, &e),
	};
	let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
	let session = session.read();
	let Some(prompt) = session.prompts.get(name) else {
		return wire::error(id, &BridgeError::ToolNotFound {
			name: name.to_string(),
			available_tools: session.prompts.keys().cloned().collect(),
		});
	};
	wire::success(
		id,
		json!({
			"description": prompt.description,
			"messages": [],
		}),
	)
}

/// Canonicalize a frontend tool/resource handler's result into MCP content
/// form. A top-level `content` array is passed through as-is; a legacy
/// `{data}` wrapper is treated as a content string for compatibility; any
/// other JSON value is stringified into a single text block. A top-level
/// `_meta` is always split out and carried alongside, never folded into
/// the content payload (spec §4.5, §9).
fn content_wrap(result: Value) -> Value {
	let meta = result.get("_meta").cloned();
	let mut body = if let Some(content) = result.get("content") {
		json!({ "content": content.clone() })
	} else if let Some(data) = result.get("data") {
		let text = match data {
			Value::String(s) => s.clone(),
			other => other.to_string(),
		};
		json!({ "content": [{"type": "text", "text": text}] })
	} else {
		json!({ "content": [{"type": "text", "text": result.to_string()}] })
	};
	if let Some(meta) = meta {
		body["_meta"] = meta;
	}
	body
}
