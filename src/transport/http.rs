//! C8 — Transport Adapters, HTTP/WebSocket binding (spec §4.8, §6).
//!
//! Builds the axum `Router`: the frontend duplex WebSocket, the two MCP
//! consumer wire formats (legacy proxy POST, Streamable-HTTP POST/GET/
//! DELETE), the query lifecycle endpoints, and `/health` + `/config`. SSE
//! framing is built here with `sse-stream` (`Sse`/`SseBody`/`KeepAlive` plus
//! a `TokioSseTimer`) — C6 itself only owns the per-session coalescing
//! primitive, not the wire bytes.

use std::borrow::Cow;
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use sse_stream::{KeepAlive, Sse, SseBody};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::mcp::auth::{self, RequestCredentials, ScopeDecision};
use crate::mcp::notify::{notification_stream, NotificationKind};
use crate::mcp::{handler, wire};
use crate::query::http as query_http;
use crate::session::link::{new_session, CloseReason, FrontendLink, OutboundFrame};
use crate::telemetry::log;
use crate::{info, warn, Arc, AppState, BridgeError};

/// WebSocket close codes used when C8 tears a frontend link down itself
/// rather than letting the transport reset (RFC 6455 §7.4.1).
const WS_CLOSE_POLICY_VIOLATION: u16 = 1008;
const WS_CLOSE_GOING_AWAY: u16 = 1001;

pub fn build_router(state: Arc<AppState>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/config", get(config))
		.route("/link", get(link_upgrade))
		.route("/rpc", post(legacy_rpc))
		.route("/mcp", post(mcp_post).get(mcp_get).delete(mcp_delete))
		.route("/query/{uuid}", put(query_http::create_query))
		.route("/query/{uuid}/progress", post(query_http::progress))
		.route("/query/{uuid}/complete", put(query_http::complete))
		.route("/query/{uuid}/fail", put(query_http::fail))
		.route("/query/{uuid}/cancel", put(query_http::cancel))
		.layer(
			ServiceBuilder::new()
				.layer(CatchPanicLayer::new())
				.layer(TraceLayer::new_for_http())
				.layer(CorsLayer::permissive()),
		)
		.with_state(state)
}

async fn health() -> Json<Value> {
	Json(json!({
		"status": "ok",
		"timestamp": chrono::Utc::now().to_rfc3339(),
	}))
}

async fn config(State(state): State<Arc<AppState>>) -> Json<Value> {
	Json(state.config_payload())
}

#[derive(Debug, Deserialize)]
struct LinkQuery {
	session: String,
	token: String,
	name: Option<String>,
	origin: Option<String>,
	#[serde(rename = "pageTitle")]
	page_title: Option<String>,
}

/// `GET /link?session=...&token=...` — the frontend duplex channel
/// upgrade (spec §4.8's "connection upgrade" surface). Any prior session
/// with the same id is replaced atomically by `SessionRegistry::attach`'s
/// caller contract; its PendingCalls fail with `SessionGone` (spec §5).
async fn link_upgrade(State(state): State<Arc<AppState>>, Query(q): Query<LinkQuery>, ws: WebSocketUpgrade) -> Response {
	ws.on_upgrade(move |socket| run_link(state, q, socket))
}

async fn run_link(state: Arc<AppState>, q: LinkQuery, socket: WebSocket) {
	let session_id = q.session.clone();
	let session = new_session(q.session, q.token, q.name, q.origin, q.page_title);
	if let Err(e) = state.registry.attach(session) {
		warn!(session_id, error = %e, "rejecting frontend link attach");
		return;
	}

	let (ws_tx, ws_rx) = socket.split();
	let inbound = ws_rx
		.filter_map(|msg| async move {
			match msg {
				Ok(Message::Text(t)) => Some(Ok(t.to_string())),
				Ok(Message::Close(_)) => None,
				Ok(_) => None,
				Err(e) => Some(Err(BridgeError::InternalError(e.to_string()))),
			}
		})
		.boxed();
	let outbound = ws_tx
		.sink_map_err(|e| BridgeError::InternalError(e.to_string()))
		.with(|frame: OutboundFrame| async move {
			Ok::<_, BridgeError>(match frame {
				OutboundFrame::Text(s) => Message::Text(s.into()),
				OutboundFrame::Close(CloseReason::PolicyViolation) => Message::Close(Some(CloseFrame {
					code: WS_CLOSE_POLICY_VIOLATION,
					reason: Cow::Borrowed("frame corruption"),
				})),
				OutboundFrame::Close(CloseReason::GoingAway) => Message::Close(Some(CloseFrame {
					code: WS_CLOSE_GOING_AWAY,
					reason: Cow::Borrowed("server shutting down"),
				})),
			})
		})
		.boxed();

	let link = FrontendLink {
		session_id,
		registry: state.registry.clone(),
		pending: state.pending.clone(),
		queries: state.queries.clone(),
		outbox: state.outbox.clone(),
		shutdown: state.shutdown.clone(),
	};
	link.run(inbound, outbound).await;
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<String> {
	headers
		.get(axum::http::header::AUTHORIZATION)?
		.to_str()
		.ok()?
		.strip_prefix("Bearer ")
		.map(str::to_string)
}

fn meta_str(params: &Value, key: &str) -> Option<String> {
	params.get("_meta")?.get(key)?.as_str().map(str::to_string)
}

fn mcp_session_id(headers: &HeaderMap) -> Option<String> {
	headers.get("Mcp-Session-Id")?.to_str().ok().map(str::to_string)
}

async fn resolve_request(state: &AppState, headers: &HeaderMap, params: &Value) -> ScopeDecision {
	let bearer = bearer_token(headers);
	let meta_session_id = meta_str(params, "sessionId");
	let meta_query_id = meta_str(params, "queryId");
	let creds = RequestCredentials {
		bearer: bearer.as_deref(),
		meta_session_id: meta_session_id.as_deref(),
		meta_query_id: meta_query_id.as_deref(),
	};
	auth::resolve(&creds, &state.registry, &state.queries)
}

/// Legacy proxy mode (spec §4.5): one synchronous POST, no `Mcp-Session-Id`
/// minted and no SSE stream — every call carries its own credentials.
async fn legacy_rpc(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<wire::JsonRpcRequest>) -> Json<Value> {
	let span = log::request_span(&req.method);
	if let Some(meta_session_id) = meta_str(&req.params, "sessionId") {
		log::record_session(&span, &meta_session_id);
	}
	if let Some(query_id) = meta_str(&req.params, "queryId") {
		log::record_query(&span, &query_id);
	}
	async {
		let decision = resolve_request(&state, &headers, &req.params).await;
		Json(handler::dispatch(&state, decision, req).await)
	}
	.instrument(span)
	.await
}

/// Streamable-HTTP `POST`: JSON-RPC request/response; `initialize` mints
/// an `Mcp-Session-Id` returned via response header (spec §4.5, §6).
async fn mcp_post(State(state): State<Arc<AppState>>, headers: HeaderMap, Json(req): Json<wire::JsonRpcRequest>) -> Response {
	let span = log::request_span(&req.method);
	if let Some(id) = mcp_session_id(&headers) {
		log::record_mcp_session(&span, &id);
	}
	if let Some(query_id) = meta_str(&req.params, "queryId") {
		log::record_query(&span, &query_id);
	}
	async {
		let bearer = bearer_token(&headers);
		let meta_query_id = meta_str(&req.params, "queryId");
		let decision = resolve_request(&state, &headers, &req.params).await;
		let rejected = matches!(decision, ScopeDecision::Rejected(_));
		let mint_session = req.method == "initialize" && !rejected;

		let body = handler::dispatch(&state, decision, req).await;

		if mint_session {
			let entry = state.mcp_sessions.create(bearer, meta_query_id);
			return (
				[(HeaderName::from_static("mcp-session-id"), entry.id.clone())],
				Json(body),
			)
				.into_response();
		}
		Json(body).into_response()
	}
	.instrument(span)
	.await
}

/// Streamable-HTTP `GET` with `Accept: text/event-stream` — opens the SSE
/// stream for an already-initialized MCP session.
///
/// The coalesced notification stream is handed off to the SSE body through
/// a bounded channel rather than mapped straight across: if the consumer
/// falls far enough behind that the channel fills up, that's the write
/// backpressure spec §4.6/§7 calls `SlowConsumer` for, and the stream
/// (and the underlying `McpSessionEntry`) are torn down instead of
/// buffering without bound.
async fn mcp_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
	let Some(id) = mcp_session_id(&headers) else {
		return (StatusCode::BAD_REQUEST, "missing Mcp-Session-Id").into_response();
	};
	let Some(entry) = state.mcp_sessions.get(&id) else {
		return (StatusCode::NOT_FOUND, "unknown MCP session").into_response();
	};

	let (tx, rx) = mpsc::channel::<NotificationKind>(32);
	let mcp_sessions = state.mcp_sessions.clone();
	tokio::spawn(async move {
		let mut notifications = Box::pin(notification_stream(entry.clone()));
		while let Some(kind) = notifications.next().await {
			if tx.try_send(kind).is_err() {
				warn!(mcp_session_id = %entry.id, error = %BridgeError::SlowConsumer, "SSE consumer fell behind, tearing down stream");
				mcp_sessions.remove(&entry.id);
				break;
			}
		}
	});

	let stream = futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|kind| (kind, rx)) }).map(|kind| {
		let payload = json!({"jsonrpc": "2.0", "method": kind.method(), "params": {}});
		let sse = Sse::default().data(payload.to_string());
		Ok::<Sse, Infallible>(sse)
	});
	let body = SseBody::new(stream).with_keep_alive::<TokioSseTimer>(KeepAlive::new().interval(Duration::from_secs(30)));

	Response::builder()
		.status(StatusCode::OK)
		.header(axum::http::header::CONTENT_TYPE, "text/event-stream")
		.header(axum::http::header::CACHE_CONTROL, "no-cache")
		.body(axum::body::Body::new(body))
		.expect("valid SSE response")
}

/// Streamable-HTTP `DELETE` — tears down the MCP session (spec §4.5, §6).
async fn mcp_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
	let Some(id) = mcp_session_id(&headers) else {
		return StatusCode::BAD_REQUEST;
	};
	state.mcp_sessions.remove(&id);
	info!(mcp_session_id = %id, "mcp session torn down");
	StatusCode::NO_CONTENT
}

pin_project_lite::pin_project! {
	struct TokioSseTimer {
		#[pin]
		sleep: tokio::time::Sleep,
	}
}

impl std::future::Future for TokioSseTimer {
	type Output = ();

	fn poll(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
		self.project().sleep.poll(cx)
	}
}

impl sse_stream::Timer for TokioSseTimer {
	fn from_duration(duration: Duration) -> Self {
		Self {
			sleep: tokio::time::sleep(duration),
		}
	}

	fn reset(self: std::pin::Pin<&mut Self>, when: std::time::Instant) {
		self.project().sleep.reset(tokio::time::Instant::from_std(when));
	}
}
