//! C2 — Frontend Link (spec §4.2, §6).
//!
//! One duplex channel per frontend. The link itself is transport-agnostic:
//! it is driven by any `Stream<Item = Result<String, BridgeError>>` /
//! `Sink<OutboundFrame, Error = BridgeError>` pair, so the same dispatch
//! logic serves a WebSocket today and could serve another message-oriented
//! transport tomorrow (C8 owns the concrete binding, including mapping
//! `OutboundFrame::Close` onto whatever close mechanism the transport has).
//!
//! Spec §4.2 draws a line between two kinds of bad inbound frame: one with
//! an unrecognized or malformed `type` payload is logged and dropped, the
//! link otherwise unaffected; a frame that isn't valid JSON at all is
//! framing corruption and ends the channel, closing with `PolicyViolation`
//! rather than a silent drop. Only that case and a genuine transport-level
//! error end the read loop.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::query::QueryEngine;
use crate::session::outbox::FrontendOutbox;
use crate::session::pending::PendingCallTable;
use crate::session::registry::{Session, SessionRegistry, ToolEntry};
use crate::{debug, info, warn, Arc, SERVER_NAME, SERVER_VERSION};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
	RegisterTool {
		name: String,
		description: Option<String>,
		#[serde(rename = "inputSchema")]
		input_schema: Option<Value>,
		#[serde(rename = "outputSchema")]
		output_schema: Option<Value>,
		#[serde(rename = "_meta")]
		meta: Option<Value>,
	},
	UnregisterTool {
		name: String,
	},
	RegisterResource {
		uri: String,
		name: String,
		description: Option<String>,
		#[serde(rename = "mimeType")]
		mime_type: Option<String>,
	},
	UnregisterResource {
		uri: String,
	},
	ToolResponse {
		#[serde(rename = "requestId")]
		request_id: u64,
		result: Option<Value>,
		error: Option<String>,
	},
	ResourceResponse {
		#[serde(rename = "requestId")]
		request_id: u64,
		result: Option<Value>,
		error: Option<String>,
	},
	QueryCancel {
		#[serde(rename = "queryId")]
		query_id: String,
		reason: Option<String>,
	},
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
	ServerInfo {
		name: String,
		version: String,
		capabilities: Value,
	},
	ToolCall {
		#[serde(rename = "requestId")]
		request_id: u64,
		name: String,
		arguments: Value,
	},
	ResourceRead {
		#[serde(rename = "requestId")]
		request_id: u64,
		uri: String,
	},
	Query {
		query: Value,
	},
	QueryProgress {
		#[serde(rename = "queryId")]
		query_id: String,
		message: Value,
	},
	QueryComplete {
		#[serde(rename = "queryId")]
		query_id: String,
		message: Value,
		#[serde(rename = "toolCallLog")]
		tool_call_log: Value,
	},
	QueryFailure {
		#[serde(rename = "queryId")]
		query_id: String,
		error: Value,
	},
	QueryCancel {
		#[serde(rename = "queryId")]
		query_id: String,
	},
}

/// Why the link's outbound sink should close the transport, handed to C8
/// so it can pick the right wire-level close code without this module
/// knowing about WebSockets specifically.
#[derive(Debug, Clone, Copy)]
pub enum CloseReason {
	/// A frame that isn't valid JSON at all — framing corruption.
	PolicyViolation,
	/// The bridge is shutting down and draining live links (spec §5).
	GoingAway,
}

/// One unit handed to the transport-owned outbound sink: either a JSON
/// text frame, or an instruction to close the transport with a reason.
#[derive(Debug)]
pub enum OutboundFrame {
	Text(String),
	Close(CloseReason),
}

pub struct FrontendLink {
	pub session_id: String,
	pub registry: Arc<SessionRegistry>,
	pub pending: Arc<PendingCallTable>,
	pub queries: Arc<QueryEngine>,
	pub outbox: Arc<FrontendOutbox>,
	/// Fires at process shutdown; the read loop selects on it to close
	/// with `GoingAway` rather than leaving the socket to reset mid-drain.
	pub shutdown: Arc<tokio::sync::Notify>,
}

impl FrontendLink {
	/// Drive one frontend's duplex channel until the transport closes.
	/// `session` has already been attached to the registry by the caller
	/// (C8); this registers the outbound queue, writes the server-info
	/// frame, then services inbound frames and queued outbound frames
	/// (tool-call, resource-read, query lifecycle relays) until the
	/// transport ends.
	pub async fn run<In, Out>(self, mut inbound: In, mut outbound: Out)
	where
		In: Stream<Item = Result<String, crate::BridgeError>> + Unpin,
		Out: Sink<OutboundFrame, Error = crate::BridgeError> + Unpin,
	{
		let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
		self.outbox.register(&self.session_id, tx);

		let hello = OutboundMessage::ServerInfo {
			name: SERVER_NAME.to_string(),
			version: SERVER_VERSION.to_string(),
			capabilities: serde_json::json!({
				"tools": true,
				"resources": true,
				"prompts": true,
				"queries": true,
			}),
		};
		if Self::send(&mut outbound, &hello).await.is_err() {
			self.teardown();
			return;
		}

		loop {
			tokio::select! {
				frame = inbound.next() => {
					match frame {
						Some(Ok(text)) => {
							match serde_json::from_str::<Value>(&text) {
								Ok(raw) => match serde_json::from_value::<InboundMessage>(raw) {
									Ok(msg) => self.dispatch(msg).await,
									Err(_) => debug!(session_id = %self.session_id, "dropping frontend frame with unrecognized shape"),
								},
								Err(_) => {
									warn!(session_id = %self.session_id, "frontend sent non-JSON frame, closing with PolicyViolation");
									Self::close_with(&mut outbound, CloseReason::PolicyViolation).await;
									break;
								},
							}
						},
						Some(Err(e)) => {
							warn!(session_id = %self.session_id, error = %e, "frontend link transport error, closing");
							break;
						},
						None => break,
					}
				},
				queued = rx.recv() => {
					match queued {
						Some(msg) => {
							if Self::send(&mut outbound, &msg).await.is_err() {
								break;
							}
						},
						None => break,
					}
				},
				_ = self.shutdown.notified() => {
					info!(session_id = %self.session_id, "closing frontend link for shutdown");
					Self::close_with(&mut outbound, CloseReason::GoingAway).await;
					break;
				},
			}
		}

		self.teardown();
	}

	fn teardown(&self) {
		self.outbox.unregister(&self.session_id);
		self.queries.detach_session(&self.session_id);
		self.pending.fail_all_for_session(&self.session_id);
		self.registry.detach(&self.session_id);
	}

	async fn send<Out>(outbound: &mut Out, msg: &OutboundMessage) -> Result<(), ()>
	where
		Out: Sink<OutboundFrame, Error = crate::BridgeError> + Unpin,
	{
		let text = serde_json::to_string(msg).expect("OutboundMessage always serializes");
		outbound.send(OutboundFrame::Text(text)).await.map_err(|_| ())
	}

	async fn close_with<Out>(outbound: &mut Out, reason: CloseReason)
	where
		Out: Sink<OutboundFrame, Error = crate::BridgeError> + Unpin,
	{
		let _ = outbound.send(OutboundFrame::Close(reason)).await;
	}

	async fn dispatch(&self, msg: InboundMessage) {
		let Some(session) = self.registry.get(&self.session_id) else {
			return;
		};
		session.write().touch();

		match msg {
			InboundMessage::RegisterTool {
				name,
				description,
				input_schema,
				output_schema,
				meta,
			} => {
				let entry = ToolEntry {
					name: name.clone(),
					description,
					input_schema,
					output_schema,
					meta,
				};
				match crate::mcp::conflict::check(&self.registry, &session, &entry) {
					Ok(()) => {
						session.write().tools.insert(name.clone(), entry);
						self.registry.record_tool_added(&self.session_id, &name);
					},
					Err(e) => {
						warn!(session_id = %self.session_id, tool = %name, error = %e, "rejecting tool registration");
					},
				}
			},
			InboundMessage::UnregisterTool { name } => {
				if session.write().tools.remove(&name).is_some() {
					self.registry.record_tool_removed(&self.session_id, &name);
				}
			},
			InboundMessage::RegisterResource {
				uri,
				name,
				description,
				mime_type,
			} => {
				session.write().resources.insert(
					uri.clone(),
					crate::session::registry::ResourceEntry {
						uri: uri.clone(),
						name,
						description,
						mime_type,
					},
				);
				self.registry.record_resource_added(&self.session_id, &uri);
			},
			InboundMessage::UnregisterResource { uri } => {
				if session.write().resources.remove(&uri).is_some() {
					self.registry.record_resource_removed(&self.session_id, &uri);
				}
			},
			InboundMessage::ToolResponse {
				request_id,
				result,
				error,
			}
			| InboundMessage::ResourceResponse {
				request_id,
				result,
				error,
			} => {
				let outcome = match (result, error) {
					(_, Some(e)) => Err(e),
					(Some(v), None) => Ok(v),
					(None, None) => Ok(Value::Null),
				};
				self.pending.complete(&self.session_id, request_id, outcome);
			},
			InboundMessage::QueryCancel { query_id, reason } => {
				self.queries.cancel_from_frontend(&query_id, reason);
			},
		}
	}
}

/// Construct a fresh `Session` for a newly-accepted channel. Exposed here
/// (rather than only on `Session`) because C8 needs it before it has a
/// `FrontendLink` to hand the channel to.
pub fn new_session(
	session_id: String,
	auth_token: String,
	name: Option<String>,
	origin: Option<String>,
	page_title: Option<String>,
) -> Session {
	let mut session = Session::new(session_id, auth_token, name, origin);
	session.page_title = page_title;
	session
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::pending::PendingCallKind;
	use futures_util::stream;
	use std::convert::Infallible;

	fn setup() -> (Arc<SessionRegistry>, Arc<PendingCallTable>, Arc<QueryEngine>, Arc<FrontendOutbox>) {
		let registry = Arc::new(SessionRegistry::new());
		let pending = PendingCallTable::new();
		let queries = QueryEngine::new(None, std::time::Duration::from_secs(60), registry.clone());
		let outbox = FrontendOutbox::new();
		(registry, pending, queries, outbox)
	}

	fn shutdown() -> Arc<tokio::sync::Notify> {
		Arc::new(tokio::sync::Notify::new())
	}

	#[tokio::test]
	async fn register_tool_then_disconnect_cleans_up() {
		let (registry, pending, queries, outbox) = setup();
		let session = new_session("s1".into(), "tok".into(), None, None, None);
		registry.attach(session).unwrap();

		let frames = vec![Ok(serde_json::json!({
			"type": "register-tool",
			"name": "greet",
			"description": "says hello",
		})
		.to_string())];
		let inbound = stream::iter(frames);
		let (outbound, _rx) = test_sink();

		let link = FrontendLink {
			session_id: "s1".into(),
			registry: registry.clone(),
			pending: pending.clone(),
			queries: queries.clone(),
			outbox,
			shutdown: shutdown(),
		};
		link.run(inbound, outbound).await;

		assert!(registry.get("s1").is_none());
	}

	#[tokio::test]
	async fn tool_response_completes_pending_call() {
		let (registry, pending, queries, outbox) = setup();
		registry.attach(new_session("s1".into(), "tok".into(), None, None, None)).unwrap();
		let (_id, rx) = pending.register("s1", PendingCallKind::ToolCall, std::time::Duration::from_secs(30));

		let frames = vec![Ok(serde_json::json!({
			"type": "tool-response",
			"requestId": 1,
			"result": {"message": "hi"},
		})
		.to_string())];
		let inbound = stream::iter(frames);
		let (outbound, _rx2) = test_sink();
		let link = FrontendLink {
			session_id: "s1".into(),
			registry,
			pending,
			queries,
			outbox,
			shutdown: shutdown(),
		};
		link.run(inbound, outbound).await;
		let outcome = rx.await.unwrap();
		assert_eq!(
			outcome,
			crate::session::pending::PendingOutcome::Ok(serde_json::json!({"message": "hi"}))
		);
	}

	#[tokio::test]
	async fn non_json_frame_closes_with_policy_violation() {
		let (registry, pending, queries, outbox) = setup();
		registry.attach(new_session("s1".into(), "tok".into(), None, None, None)).unwrap();

		let frames = vec![Ok("not json at all".to_string())];
		let inbound = stream::iter(frames);
		let (outbound, mut rx) = test_sink();
		let link = FrontendLink {
			session_id: "s1".into(),
			registry,
			pending,
			queries,
			outbox,
			shutdown: shutdown(),
		};
		link.run(inbound, outbound).await;

		rx.recv().await.unwrap(); // server-info hello
		let closed = rx.recv().await.unwrap();
		assert!(matches!(closed, OutboundFrame::Close(CloseReason::PolicyViolation)));
	}

	fn test_sink() -> (
		impl Sink<OutboundFrame, Error = crate::BridgeError> + Unpin,
		tokio::sync::mpsc::UnboundedReceiver<OutboundFrame>,
	) {
		let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<OutboundFrame>();
		let sink = futures_util::sink::unfold(tx, |tx, item: OutboundFrame| async move {
			let _ = tx.send(item);
			Ok::<_, crate::BridgeError>(tx)
		});
		let _: Infallible;
		(sink, rx)
	}
}
