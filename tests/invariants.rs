//! Universal invariants and round-trip laws from the design's testable
//! properties section, exercised against the public API the same way
//! `seed_scenarios.rs` does.

use std::sync::Arc;

use bridge::mcp::auth::{self, RequestCredentials};
use bridge::session::registry::{Session, ToolEntry};
use bridge::session::OutboundMessage;
use bridge::{AppState, Config};
use clap::Parser;
use serde_json::json;

fn state() -> Arc<AppState> {
	AppState::new(Config::parse_from(["bridged"]))
}

fn tool(name: &str) -> ToolEntry {
	ToolEntry {
		name: name.to_string(),
		description: None,
		input_schema: None,
		output_schema: None,
		meta: None,
	}
}

/// A resolving `PendingCall`'s `request_id` is the same one handed to the
/// outbound message the frontend is expected to answer.
#[tokio::test]
async fn pending_call_request_id_matches_outbound_message() {
	let state = state();
	state.registry.attach(Session::new("f1".into(), "t1".into(), None, None)).unwrap();

	let (request_id, rx) = state.pending.register(
		"f1",
		bridge::session::PendingCallKind::ToolCall,
		std::time::Duration::from_secs(5),
	);
	state
		.outbox
		.send(
			"f1",
			OutboundMessage::ToolCall {
				request_id,
				name: "greet".into(),
				arguments: json!({}),
			},
		)
		.unwrap_err();

	let (tx, mut rx_outbox) = tokio::sync::mpsc::unbounded_channel();
	state.outbox.register("f1", tx);
	state
		.outbox
		.send(
			"f1",
			OutboundMessage::ToolCall {
				request_id,
				name: "greet".into(),
				arguments: json!({}),
			},
		)
		.unwrap();
	let OutboundMessage::ToolCall { request_id: echoed, .. } = rx_outbox.recv().await.unwrap() else {
		panic!("expected ToolCall");
	};
	assert_eq!(echoed, request_id);

	assert!(state.pending.complete("f1", request_id, Ok(json!({"message": "Hello"}))));
	let outcome = rx.await.unwrap();
	assert_eq!(outcome, bridge::session::pending::PendingOutcome::Ok(json!({"message": "Hello"})));
}

/// Once a Query reaches a terminal state, no further tool call bearing its
/// `queryId` is allowed to resolve — `auth::resolve` rejects it outright.
#[tokio::test]
async fn terminal_query_blocks_further_tool_calls() {
	let state = state();
	state.registry.attach(Session::new("f1".into(), "t1".into(), None, None)).unwrap();
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	state.outbox.register("f1", tx);

	state
		.queries
		.create(
			"q1".into(),
			"f1".into(),
			bridge::query::QueryInput {
				prompt: "hi".into(),
				context: serde_json::Value::Null,
				tools: None,
				response_tool: None,
				restrict_tools: false,
			},
		)
		.unwrap();
	assert!(matches!(rx.recv().await.unwrap(), OutboundMessage::Query { .. }));

	state.queries.complete("q1", json!({"done": true})).unwrap();
	assert!(matches!(rx.recv().await.unwrap(), OutboundMessage::QueryComplete { .. }));

	let creds = RequestCredentials {
		bearer: None,
		meta_session_id: None,
		meta_query_id: Some("q1"),
	};
	let decision = auth::resolve(&creds, &state.registry, &state.queries);
	assert!(matches!(
		decision,
		bridge::mcp::auth::ScopeDecision::Rejected(bridge::BridgeError::QueryCompleted(_))
	));

	// A second terminal transition on the same query is also rejected.
	assert!(state.queries.complete("q1", json!({"done": true})).is_err());
}

/// `tools/list` for a scope containing session S is a permutation of
/// `list_sessions ∪ S.tools`, regardless of how many other tools S's
/// siblings under the same token expose.
#[tokio::test]
async fn tools_list_is_permutation_of_list_sessions_and_session_tools() {
	let state = state();
	let s1 = state.registry.attach(Session::new("f1".into(), "t1".into(), None, None)).unwrap();
	s1.write().tools.insert("greet".into(), tool("greet"));
	s1.write().tools.insert("wave".into(), tool("wave"));

	let decision = auth::resolve(
		&RequestCredentials {
			bearer: Some("t1"),
			meta_session_id: None,
			meta_query_id: None,
		},
		&state.registry,
		&state.queries,
	);
	let req = bridge::mcp::wire::JsonRpcRequest {
		jsonrpc: "2.0".into(),
		id: json!(1),
		method: "tools/list".into(),
		params: json!({}),
	};
	let resp = bridge::mcp::handler::dispatch(&state, decision, req).await;
	let mut names: Vec<String> = resp["result"]["tools"]
		.as_array()
		.unwrap()
		.iter()
		.map(|t| t["name"].as_str().unwrap().to_string())
		.collect();
	names.sort();
	let mut expected = vec!["list_sessions".to_string(), "greet".to_string(), "wave".to_string()];
	expected.sort();
	assert_eq!(names, expected);
}

/// Re-issuing `tools/list` with the same bearer and no mutations in
/// between yields identical sets modulo ordering.
#[tokio::test]
async fn repeated_tools_list_is_stable_absent_mutation() {
	let state = state();
	let session = state.registry.attach(Session::new("f1".into(), "t1".into(), None, None)).unwrap();
	session.write().tools.insert("greet".into(), tool("greet"));

	async fn list(state: &Arc<AppState>) -> Vec<String> {
		let decision = auth::resolve(
			&RequestCredentials {
				bearer: Some("t1"),
				meta_session_id: None,
				meta_query_id: None,
			},
			&state.registry,
			&state.queries,
		);
		let resp = bridge::mcp::handler::dispatch(
			state,
			decision,
			bridge::mcp::wire::JsonRpcRequest {
				jsonrpc: "2.0".into(),
				id: json!(1),
				method: "tools/list".into(),
				params: json!({}),
			},
		)
		.await;
		resp["result"]["tools"]
			.as_array()
			.unwrap()
			.iter()
			.map(|t| t["name"].as_str().unwrap().to_string())
			.collect()
	}

	let first = list(&state).await;
	let second = list(&state).await;

	let mut first_sorted = first.clone();
	first_sorted.sort();
	let mut second_sorted = second.clone();
	second_sorted.sort();
	assert_eq!(first_sorted, second_sorted);
}

/// A deterministic handler's bytes survive `tools/call` unchanged, just
/// wrapped in MCP content form.
#[tokio::test]
async fn tool_call_round_trips_deterministic_bytes() {
	let state = state();
	state
		.registry
		.attach(Session::new("f1".into(), "t1".into(), None, None))
		.unwrap()
		.write()
		.tools
		.insert("echo".into(), tool("echo"));

	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	state.outbox.register("f1", tx);
	let state_bg = state.clone();
	tokio::spawn(async move {
		if let Some(OutboundMessage::ToolCall { request_id, arguments, .. }) = rx.recv().await {
			state_bg.pending.complete("f1", request_id, Ok(arguments));
		}
	});

	let payload = json!({"a": 1, "b": [true, "x"]});
	let decision = auth::resolve(
		&RequestCredentials {
			bearer: Some("t1"),
			meta_session_id: None,
			meta_query_id: None,
		},
		&state.registry,
		&state.queries,
	);
	let req = bridge::mcp::wire::JsonRpcRequest {
		jsonrpc: "2.0".into(),
		id: json!(1),
		method: "tools/call".into(),
		params: json!({"name": "echo", "arguments": payload.clone()}),
	};
	let resp = bridge::mcp::handler::dispatch(&state, decision, req).await;
	assert_eq!(resp["result"]["content"][0]["text"], payload.to_string());
}
