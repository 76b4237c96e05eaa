//! C9 — Tool-Conflict Arbiter (spec §4.9).
//!
//! Within one `session_name` namespace, a newly-registered tool's schemas
//! must structurally agree with any sibling session's tool of the same
//! name. `serde_json::Value`'s `PartialEq` already compares objects by key
//! and value rather than insertion order, which is exactly the structural
//! JSON-Schema equivalence this check needs.

use parking_lot::RwLock;
use serde_json::Value;

use crate::session::registry::{Session, SessionRegistry, ToolEntry};
use crate::{Arc, BridgeError};

pub fn check(registry: &SessionRegistry, session: &Arc<RwLock<Session>>, entry: &ToolEntry) -> Result<(), BridgeError> {
	let (name, session_id) = {
		let s = session.read();
		(s.name.clone(), s.id.clone())
	};
	let Some(name) = name else {
		return Ok(());
	};

	for sibling in registry.siblings_by_name(&name, &session_id) {
		let sibling = sibling.read();
		if let Some(existing) = sibling.tools.get(&entry.name) {
			if !schemas_equivalent(&existing.input_schema, &entry.input_schema)
				|| !schemas_equivalent(&existing.output_schema, &entry.output_schema)
			{
				return Err(BridgeError::ToolSchemaConflict {
					name: entry.name.clone(),
					details: format!(
						"tool '{}' schema disagrees with sibling session '{}' in namespace '{}'",
						entry.name, sibling.id, name
					),
				});
			}
		}
	}
	Ok(())
}

fn schemas_equivalent(a: &Option<Value>, b: &Option<Value>) -> bool {
	match (a, b) {
		(None, None) => true,
		(Some(a), Some(b)) => a == b,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::session::registry::Session;

	fn session(id: &str, name: &str) -> Session {
		Session::new(id.to_string(), "tok".to_string(), Some(name.to_string()), None)
	}

	fn tool(name: &str, schema: Value) -> ToolEntry {
		ToolEntry {
			name: name.to_string(),
			description: None,
			input_schema: Some(schema),
			output_schema: None,
			meta: None,
		}
	}

	#[test]
	fn no_sibling_namespace_always_passes() {
		let reg = SessionRegistry::new();
		let handle = reg.attach(session("s1", "studio")).unwrap();
		let entry = tool("greet", serde_json::json!({"type": "object"}));
		assert!(check(&reg, &handle, &entry).is_ok());
	}

	#[test]
	fn matching_schema_on_sibling_passes() {
		let reg = SessionRegistry::new();
		let h1 = reg.attach(session("s1", "studio")).unwrap();
		let h2 = reg.attach(session("s2", "studio")).unwrap();
		let schema = serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}});
		h1.write().tools.insert("greet".into(), tool("greet", schema.clone()));

		let entry = tool("greet", schema);
		assert!(check(&reg, &h2, &entry).is_ok());
	}

	#[test]
	fn differing_schema_on_sibling_is_rejected() {
		let reg = SessionRegistry::new();
		let h1 = reg.attach(session("s1", "studio")).unwrap();
		let h2 = reg.attach(session("s2", "studio")).unwrap();
		h1
			.write()
			.tools
			.insert("greet".into(), tool("greet", serde_json::json!({"type": "object"})));

		let entry = tool("greet", serde_json::json!({"type": "string"}));
		let err = check(&reg, &h2, &entry).unwrap_err();
		assert!(matches!(err, BridgeError::ToolSchemaConflict { .. }));
	}
}
