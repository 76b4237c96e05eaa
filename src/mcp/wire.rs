//! JSON-RPC 2.0 envelope helpers shared by C5's two wire formats (legacy
//! proxy POST and Streamable-HTTP). Modeled as plain `serde_json::Value`
//! rather than `rmcp`'s wire types: the handler needs to accept whatever
//! shape a real MCP client sends and answer in kind, and `Value` keeps that
//! honest without committing to a struct shape this codebase can't verify
//! end to end.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::BridgeError;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
	#[serde(default = "default_jsonrpc")]
	pub jsonrpc: String,
	#[serde(default)]
	pub id: Value,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

fn default_jsonrpc() -> String {
	"2.0".to_string()
}

pub fn success(id: &Value, result: Value) -> Value {
	json!({
		"jsonrpc": "2.0",
		"id": id,
		"result": result,
	})
}

pub fn error(id: &Value, err: &BridgeError) -> Value {
	json!({
		"jsonrpc": "2.0",
		"id": id,
		"error": err.to_json_rpc_error(),
	})
}

/// A `tools/list`-shaped success result that also carries the disambiguation
/// markers spec §4.4/§4.5 require for `NeedSessionChoice` (`isError` plus
/// `available_sessions`) without failing the call outright.
pub fn list_result_with_choice(items_key: &str, items: Value, available_sessions: Vec<Value>) -> Value {
	json!({
		items_key: items,
		"isError": true,
		"available_sessions": available_sessions,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn request_defaults_jsonrpc_version_when_absent() {
		let req: JsonRpcRequest = serde_json::from_value(json!({
			"method": "tools/list",
			"id": 1,
		}))
		.unwrap();
		assert_eq!(req.jsonrpc, "2.0");
		assert_eq!(req.method, "tools/list");
	}

	#[test]
	fn success_envelope_echoes_the_request_id() {
		let env = success(&json!(7), json!({"ok": true}));
		assert_eq!(env["id"], json!(7));
		assert_eq!(env["result"]["ok"], json!(true));
	}

	#[test]
	fn error_envelope_carries_the_stable_code() {
		let env = error(&json!(1), &BridgeError::MissingAuthentication);
		assert_eq!(env["error"]["code"], json!(-32001));
	}
}
