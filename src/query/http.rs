//! C7's HTTP surface (spec §6): the frontend creates a query, the agent
//! drives its lifecycle. All five endpoints share `AppState` and answer
//! with the stable error table (§7) via `BridgeError::http_status`.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::{json, Value};

use crate::mcp::auth;
use crate::query::engine::QueryInput;
use crate::transport::http::bearer_token;
use crate::{Arc, AppState, BridgeError};

fn err_response(e: BridgeError) -> Response {
	(e.http_status(), Json(json!({"error": e.to_string()}))).into_response()
}

/// The `PUT /query/:uuid` body carries no session-identifying field (spec
/// §4.7, §6) — the origin session comes from the same `Authorization:
/// Bearer` mechanism every other endpoint resolves through. `?sessionId=`
/// disambiguates when one bearer token matches more than one live session,
/// mirroring `_meta.sessionId` on the MCP side.
#[derive(serde::Deserialize, Default)]
pub struct OriginQuery {
	#[serde(rename = "sessionId")]
	session_id: Option<String>,
}

fn resolve_origin_session(state: &AppState, headers: &HeaderMap, session_id: Option<&str>) -> Result<String, BridgeError> {
	let token = bearer_token(headers).ok_or(BridgeError::MissingAuthentication)?;
	let candidates = state.registry.find_by_auth(&token);
	if candidates.is_empty() {
		return Err(BridgeError::InvalidAuthentication);
	}
	if candidates.len() == 1 {
		return Ok(candidates[0].read().id.clone());
	}
	match session_id {
		Some(id) => candidates
			.iter()
			.find(|s| s.read().id == id)
			.map(|s| s.read().id.clone())
			.ok_or_else(|| BridgeError::SessionNotFound(id.to_string())),
		None => Err(BridgeError::SessionNotSpecified {
			available_sessions: auth::available_sessions(&candidates),
		}),
	}
}

/// `PUT /query/:uuid` — frontend creates a query (spec §4.7, §6).
pub async fn create_query(
	State(state): State<Arc<AppState>>,
	Path(uuid): Path<String>,
	Query(origin): Query<OriginQuery>,
	headers: HeaderMap,
	Json(body): Json<CreateQueryBody>,
) -> Response {
	let origin_session_id = match resolve_origin_session(&state, &headers, origin.session_id.as_deref()) {
		Ok(id) => id,
		Err(e) => return err_response(e),
	};
	let input = QueryInput {
		prompt: body.prompt,
		context: body.context,
		tools: body.tools,
		response_tool: body.response_tool,
		restrict_tools: body.restrict_tools,
	};
	match state.queries.create(uuid, origin_session_id, input) {
		Ok(()) => StatusCode::ACCEPTED.into_response(),
		Err(e) => err_response(e),
	}
}

#[derive(serde::Deserialize)]
pub struct CreateQueryBody {
	pub prompt: String,
	#[serde(default)]
	pub context: Value,
	pub tools: Option<Vec<String>>,
	#[serde(rename = "responseTool")]
	pub response_tool: Option<String>,
	#[serde(default, rename = "restrictTools")]
	pub restrict_tools: bool,
}

#[derive(serde::Deserialize)]
pub struct ProgressBody {
	pub message: Value,
}

/// `POST /query/:uuid/progress` — agent reports progress.
pub async fn progress(State(state): State<Arc<AppState>>, Path(uuid): Path<String>, Json(body): Json<ProgressBody>) -> Response {
	match state.queries.progress(&uuid, body.message) {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(e) => err_response(e),
	}
}

#[derive(serde::Deserialize)]
pub struct CompleteBody {
	pub message: Value,
}

/// `PUT /query/:uuid/complete` — agent's direct completion path (the
/// `responseTool` path completes through `mcp::handler` instead).
pub async fn complete(State(state): State<Arc<AppState>>, Path(uuid): Path<String>, Json(body): Json<CompleteBody>) -> Response {
	match state.queries.complete(&uuid, body.message) {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(e) => err_response(e),
	}
}

#[derive(serde::Deserialize)]
pub struct FailBody {
	pub error: Value,
}

/// `PUT /query/:uuid/fail`.
pub async fn fail(State(state): State<Arc<AppState>>, Path(uuid): Path<String>, Json(body): Json<FailBody>) -> Response {
	state.queries.fail(&uuid, body.error);
	StatusCode::NO_CONTENT.into_response()
}

#[derive(serde::Deserialize, Default)]
pub struct CancelBody {
	pub reason: Option<String>,
}

/// `PUT /query/:uuid/cancel` — agent-initiated cancellation.
pub async fn cancel(State(state): State<Arc<AppState>>, Path(uuid): Path<String>, body: Option<Json<CancelBody>>) -> Response {
	let reason = body.map(|Json(b)| b.reason).unwrap_or(None);
	match state.queries.cancel_from_agent(&uuid, reason) {
		Ok(()) => StatusCode::NO_CONTENT.into_response(),
		Err(e) => err_response(e),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::registry::Session;
	use crate::Config;
	use clap::Parser;

	fn state() -> Arc<AppState> {
		let config = Config::parse_from(["bridged"]);
		AppState::new(config)
	}

	fn bearer(token: &str) -> HeaderMap {
		let mut headers = HeaderMap::new();
		headers.insert(axum::http::header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
		headers
	}

	fn body() -> CreateQueryBody {
		CreateQueryBody {
			prompt: "hi".into(),
			context: Value::Null,
			tools: None,
			response_tool: None,
			restrict_tools: false,
		}
	}

	#[tokio::test]
	async fn create_query_with_unknown_bearer_is_unauthorized() {
		let state = state();
		let resp = create_query(
			State(state),
			Path("q1".into()),
			Query(OriginQuery::default()),
			bearer("ghost"),
			Json(body()),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
	}

	#[tokio::test]
	async fn create_then_complete_round_trips() {
		let state = state();
		state.registry.attach(Session::new("s1".into(), "tok".into(), None, None)).unwrap();
		let resp = create_query(
			State(state.clone()),
			Path("q1".into()),
			Query(OriginQuery::default()),
			bearer("tok"),
			Json(body()),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::ACCEPTED);

		let resp = complete(State(state), Path("q1".into()), Json(CompleteBody { message: json!({"ok": true}) })).await;
		assert_eq!(resp.status(), StatusCode::NO_CONTENT);
	}

	#[tokio::test]
	async fn create_query_with_ambiguous_bearer_needs_session_id() {
		let state = state();
		state.registry.attach(Session::new("s1".into(), "shared".into(), None, None)).unwrap();
		state.registry.attach(Session::new("s2".into(), "shared".into(), None, None)).unwrap();

		let resp = create_query(
			State(state.clone()),
			Path("q1".into()),
			Query(OriginQuery::default()),
			bearer("shared"),
			Json(body()),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

		let resp = create_query(
			State(state),
			Path("q2".into()),
			Query(OriginQuery { session_id: Some("s2".into()) }),
			bearer("shared"),
			Json(body()),
		)
		.await;
		assert_eq!(resp.status(), StatusCode::ACCEPTED);
	}
}
