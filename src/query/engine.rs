//! C7 — Query Engine (spec §4.7).
//!
//! One `Query` per frontend→agent→frontend exchange. State transitions are
//! serialized per-query under a single `Mutex<HashMap<...>>` (the table is
//! small and short-lived; a per-record owner task isn't worth the added
//! complexity a higher-volume table would need). Terminal transitions are
//! idempotent at the sender and schedule the query for pruning after
//! `retention` so a late agent retry sees `QueryNotFound` rather than
//! resurrecting a ghost state.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde_json::Value;

use crate::mcp::auth::ToolAllowlist;
use crate::session::link::OutboundMessage;
use crate::session::registry::Session;
use crate::session::{FrontendOutbox, SessionRegistry};
use crate::{debug, info, warn, Arc, BridgeError};
use parking_lot::RwLock as PLRwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
	Accepted,
	InProgress,
	Completed,
	Failed,
	Cancelled,
}

impl QueryState {
	pub fn is_terminal(self) -> bool {
		matches!(self, QueryState::Completed | QueryState::Failed | QueryState::Cancelled)
	}
}

#[derive(Debug, Clone)]
pub struct ToolCallLogEntry {
	pub tool: String,
	pub arguments: Value,
	pub result: Value,
}

#[derive(Debug, Clone)]
pub struct Query {
	pub uuid: String,
	pub origin_session_id: String,
	pub prompt: String,
	pub context: Value,
	pub response_tool: Option<String>,
	pub tools: Option<Vec<String>>,
	pub restrict_tools: bool,
	pub state: QueryState,
	pub tool_call_log: Vec<ToolCallLogEntry>,
	pub created_at: SystemTime,
}

impl Query {
	fn allowlist(&self) -> ToolAllowlist {
		match (&self.tools, self.restrict_tools) {
			(Some(names), true) => ToolAllowlist::Named(names.clone()),
			_ => ToolAllowlist::All,
		}
	}
}

/// Input accepted from the frontend at `PUT /query/:uuid` (spec §6).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueryInput {
	pub prompt: String,
	#[serde(default)]
	pub context: Value,
	pub tools: Option<Vec<String>>,
	#[serde(rename = "responseTool")]
	pub response_tool: Option<String>,
	#[serde(default, rename = "restrictTools")]
	pub restrict_tools: bool,
}

pub struct QueryEngine {
	agent_url: Option<String>,
	retention: Duration,
	registry: Arc<SessionRegistry>,
	outbox: PLRwLock<Option<Arc<FrontendOutbox>>>,
	http: reqwest::Client,
	queries: Mutex<HashMap<String, Query>>,
	self_ref: std::sync::Weak<QueryEngine>,
}

impl QueryEngine {
	pub fn new(agent_url: Option<String>, retention: Duration, registry: Arc<SessionRegistry>) -> Arc<Self> {
		Arc::new_cyclic(|self_ref| Self {
			agent_url,
			retention,
			registry,
			outbox: PLRwLock::new(None),
			http: reqwest::Client::new(),
			queries: Mutex::new(HashMap::new()),
			self_ref: self_ref.clone(),
		})
	}

	/// Wired in after construction (transport assembles the outbox and the
	/// engine in the same `Arc` cycle, so this avoids a chicken-and-egg
	/// constructor).
	pub fn bind_outbox(&self, outbox: Arc<FrontendOutbox>) {
		*self.outbox.write() = Some(outbox);
	}

	fn relay(&self, session_id: &str, msg: OutboundMessage) {
		if let Some(outbox) = self.outbox.read().as_ref() {
			if let Err(e) = outbox.send(session_id, msg) {
				debug!(session_id, error = %e, "query event dropped, frontend not connected");
			}
		}
	}

	/// Create a query, forward it to the configured agent, and return
	/// immediately. The frontend sees `202 Accepted` regardless of whether
	/// the forward succeeds; a forwarding failure is logged and surfaces to
	/// the frontend only if the agent never calls back.
	pub fn create(self: &Arc<Self>, uuid: String, origin_session_id: String, input: QueryInput) -> Result<(), BridgeError> {
		if self.registry.get(&origin_session_id).is_none() {
			return Err(BridgeError::SessionNotFound(origin_session_id));
		}

		let query = Query {
			uuid: uuid.clone(),
			origin_session_id: origin_session_id.clone(),
			prompt: input.prompt.clone(),
			context: input.context.clone(),
			response_tool: input.response_tool.clone(),
			tools: input.tools.clone(),
			restrict_tools: input.restrict_tools,
			state: QueryState::Accepted,
			tool_call_log: Vec::new(),
			created_at: SystemTime::now(),
		};
		self.queries.lock().insert(uuid.clone(), query);

		self.relay(
			&origin_session_id,
			OutboundMessage::Query {
				query: serde_json::json!({
					"uuid": uuid,
					"prompt": input.prompt,
					"context": input.context,
					"tools": input.tools,
					"responseTool": input.response_tool,
					"restrictTools": input.restrict_tools,
				}),
			},
		);

		if let Some(agent_url) = self.agent_url.clone() {
			let http = self.http.clone();
			let engine = self.clone();
			let uuid_for_task = uuid.clone();
			tokio::spawn(async move {
				let url = format!("{}/query/{}", agent_url.trim_end_matches('/'), uuid_for_task);
				let body = serde_json::json!({
					"uuid": uuid_for_task,
					"prompt": input.prompt,
					"context": input.context,
					"tools": input.tools,
					"responseTool": input.response_tool,
					"restrictTools": input.restrict_tools,
				});
				match http.put(&url).json(&body).send().await {
					Ok(resp) if resp.status().is_success() => {
						debug!(query_id = %uuid_for_task, "agent accepted query");
					},
					Ok(resp) => {
						warn!(query_id = %uuid_for_task, status = %resp.status(), "agent rejected query forward");
						engine.fail(&uuid_for_task, serde_json::json!({"error": "agent rejected query"}));
					},
					Err(e) => {
						warn!(query_id = %uuid_for_task, error = %e, "failed to forward query to agent");
						engine.fail(&uuid_for_task, serde_json::json!({"error": e.to_string()}));
					},
				}
			});
		}

		Ok(())
	}

	/// Resolution used by C4 for `QueryScoped` auth: the query must still
	/// be in a non-terminal state and its origin session must still be
	/// live.
	pub fn resolve_scope(&self, query_id: &str) -> Result<(std::sync::Arc<parking_lot::RwLock<Session>>, ToolAllowlist), BridgeError> {
		let queries = self.queries.lock();
		let query = queries.get(query_id).ok_or_else(|| BridgeError::QueryNotFound(query_id.to_string()))?;
		if query.state.is_terminal() {
			return Err(BridgeError::QueryCompleted(query_id.to_string()));
		}
		let allowlist = query.allowlist();
		let session = self
			.registry
			.get(&query.origin_session_id)
			.ok_or_else(|| BridgeError::SessionNotFound(query.origin_session_id.clone()))?;
		Ok((session, allowlist))
	}

	/// Implicit `Accepted → InProgress` on the first tool call or progress
	/// event bearing this `queryId` (spec §4.7).
	fn mark_in_progress(queries: &mut HashMap<String, Query>, query_id: &str) {
		if let Some(q) = queries.get_mut(query_id) {
			if q.state == QueryState::Accepted {
				q.state = QueryState::InProgress;
			}
		}
	}

	/// Append a completed `QueryScoped` tool call to the audit log.
	pub fn record_tool_call(&self, query_id: &str, tool: &str, arguments: Value, result: Value) {
		let mut queries = self.queries.lock();
		Self::mark_in_progress(&mut queries, query_id);
		if let Some(q) = queries.get_mut(query_id) {
			q.tool_call_log.push(ToolCallLogEntry {
				tool: tool.to_string(),
				arguments,
				result,
			});
		}
	}

	pub fn progress(&self, query_id: &str, message: Value) -> Result<(), BridgeError> {
		let origin = {
			let mut queries = self.queries.lock();
			let Some(q) = queries.get(query_id) else {
				return Err(BridgeError::QueryNotFound(query_id.to_string()));
			};
			if q.state.is_terminal() {
				return Err(BridgeError::QueryCompleted(query_id.to_string()));
			}
			Self::mark_in_progress(&mut queries, query_id);
			queries.get(query_id).unwrap().origin_session_id.clone()
		};
		self.relay(
			&origin,
			OutboundMessage::QueryProgress {
				query_id: query_id.to_string(),
				message,
			},
		);
		Ok(())
	}

	fn finish(&self, query_id: &str, terminal: QueryState) -> Result<Query, BridgeError> {
		let mut queries = self.queries.lock();
		let Some(q) = queries.get_mut(query_id) else {
			return Err(BridgeError::QueryNotFound(query_id.to_string()));
		};
		if q.state.is_terminal() {
			return Err(BridgeError::QueryCompleted(query_id.to_string()));
		}
		q.state = terminal;
		let snapshot = q.clone();
		drop(queries);
		self.schedule_prune(query_id);
		Ok(snapshot)
	}

	/// Complete via a direct agent HTTP call or via the implicit
	/// `responseTool` path (spec §4.7 point 2) — both funnel here.
	pub fn complete(&self, query_id: &str, message: Value) -> Result<(), BridgeError> {
		let query = self.finish(query_id, QueryState::Completed)?;
		let log: Vec<Value> = query
			.tool_call_log
			.iter()
			.map(|e| serde_json::json!({"tool": e.tool, "arguments": e.arguments, "result": e.result}))
			.collect();
		self.relay(
			&query.origin_session_id,
			OutboundMessage::QueryComplete {
				query_id: query_id.to_string(),
				message,
				tool_call_log: Value::Array(log),
			},
		);
		info!(query_id, "query completed");
		Ok(())
	}

	pub fn fail(&self, query_id: &str, error: Value) {
		let Ok(query) = self.finish(query_id, QueryState::Failed) else {
			return;
		};
		self.relay(
			&query.origin_session_id,
			OutboundMessage::QueryFailure {
				query_id: query_id.to_string(),
				error,
			},
		);
	}

	pub fn cancel_from_agent(&self, query_id: &str, _reason: Option<String>) -> Result<(), BridgeError> {
		let query = self.finish(query_id, QueryState::Cancelled)?;
		self.relay(
			&query.origin_session_id,
			OutboundMessage::QueryCancel {
				query_id: query_id.to_string(),
			},
		);
		Ok(())
	}

	/// The frontend's cancellation signal: mark the query terminal and echo
	/// `query_cancel` back down its own stream (spec §8 scenario 6) so the
	/// frontend can close out its UI affordance; any further agent tool
	/// call against this `queryId` then fails with `QueryCompleted`.
	pub fn cancel_from_frontend(&self, query_id: &str, _reason: Option<String>) {
		if let Ok(query) = self.finish(query_id, QueryState::Cancelled) {
			self.relay(
				&query.origin_session_id,
				OutboundMessage::QueryCancel {
					query_id: query_id.to_string(),
				},
			);
		}
	}

	/// A frontend disconnected: its in-flight queries have nowhere to
	/// relay to, so they're cancelled outright rather than left to time
	/// out against a dead link.
	pub fn detach_session(&self, session_id: &str) {
		let mut queries = self.queries.lock();
		let ids: Vec<String> = queries
			.values()
			.filter(|q| q.origin_session_id == session_id && !q.state.is_terminal())
			.map(|q| q.uuid.clone())
			.collect();
		for id in ids {
			if let Some(q) = queries.get_mut(&id) {
				q.state = QueryState::Cancelled;
			}
		}
	}

	/// Drop the terminal query from the table after the retention window so
	/// a late agent retry sees `QueryNotFound` instead of a ghost state.
	fn schedule_prune(&self, query_id: &str) {
		let Some(engine) = self.self_ref.upgrade() else {
			return;
		};
		let query_id = query_id.to_string();
		let retention = self.retention;
		tokio::spawn(async move {
			tokio::time::sleep(retention).await;
			engine.queries.lock().remove(&query_id);
		});
	}

	pub fn get(&self, query_id: &str) -> Option<Query> {
		self.queries.lock().get(query_id).cloned()
	}

	pub fn query_count(&self) -> usize {
		self.queries.lock().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::registry::Session;

	fn engine_with_session(session_id: &str) -> Arc<QueryEngine> {
		let registry = Arc::new(SessionRegistry::new());
		registry
			.attach(Session::new(session_id.to_string(), "tok".into(), None, None))
			.unwrap();
		QueryEngine::new(None, Duration::from_secs(60), registry)
	}

	fn input() -> QueryInput {
		QueryInput {
			prompt: "what is 2+2".into(),
			context: Value::Null,
			tools: None,
			response_tool: Some("submit_answer".into()),
			restrict_tools: false,
		}
	}

	#[test]
	fn create_then_resolve_scope_succeeds() {
		let engine = engine_with_session("s1");
		engine.create("q1".into(), "s1".into(), input()).unwrap();
		let (session, allowlist) = engine.resolve_scope("q1").unwrap();
		assert_eq!(session.read().id, "s1");
		assert!(allowlist.allows("anything"));
	}

	#[test]
	fn complete_is_idempotent_and_second_attempt_fails() {
		let engine = engine_with_session("s1");
		engine.create("q1".into(), "s1".into(), input()).unwrap();
		engine.complete("q1", serde_json::json!({"ok": true})).unwrap();
		let err = engine.complete("q1", serde_json::json!({"ok": true})).unwrap_err();
		assert_eq!(err, BridgeError::QueryCompleted("q1".into()));
	}

	#[test]
	fn resolve_scope_after_completion_is_rejected() {
		let engine = engine_with_session("s1");
		engine.create("q1".into(), "s1".into(), input()).unwrap();
		engine.complete("q1", Value::Null).unwrap();
		let err = engine.resolve_scope("q1").unwrap_err();
		assert_eq!(err, BridgeError::QueryCompleted("q1".into()));
	}

	#[test]
	fn unknown_query_is_not_found() {
		let engine = engine_with_session("s1");
		let err = engine.resolve_scope("ghost").unwrap_err();
		assert_eq!(err, BridgeError::QueryNotFound("ghost".into()));
	}

	#[test]
	fn detach_session_cancels_its_open_queries() {
		let engine = engine_with_session("s1");
		engine.create("q1".into(), "s1".into(), input()).unwrap();
		engine.detach_session("s1");
		let err = engine.resolve_scope("q1").unwrap_err();
		assert_eq!(err, BridgeError::QueryCompleted("q1".into()));
	}

	#[test]
	fn restrict_tools_narrows_the_allowlist() {
		let engine = engine_with_session("s1");
		let mut i = input();
		i.tools = Some(vec!["submit_answer".into()]);
		i.restrict_tools = true;
		engine.create("q1".into(), "s1".into(), i).unwrap();
		let (_, allowlist) = engine.resolve_scope("q1").unwrap();
		assert!(allowlist.allows("submit_answer"));
		assert!(!allowlist.allows("other_tool"));
	}
}
