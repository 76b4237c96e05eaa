//! C1 — Session Registry (spec §3, §4.1).
//!
//! Three in-memory indices over `Session`s: by id, by auth token
//! (multimap), by session name (multimap). Mutations emit a compact
//! `ChangeEvent` on a broadcast channel consumed by C6 (notification
//! fan-out) and C9 (tool-conflict arbiter observes siblings directly
//! through `by_name`, not through the event stream).

use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::BridgeError;
use crate::Arc;

#[derive(Debug, Clone)]
pub struct ToolEntry {
	pub name: String,
	pub description: Option<String>,
	pub input_schema: Option<Value>,
	pub output_schema: Option<Value>,
	pub meta: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ResourceEntry {
	pub uri: String,
	pub name: String,
	pub description: Option<String>,
	pub mime_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PromptEntry {
	pub name: String,
	pub description: Option<String>,
	pub arguments: Option<Value>,
}

#[derive(Debug)]
pub struct Session {
	pub id: String,
	pub name: Option<String>,
	pub origin: Option<String>,
	pub page_title: Option<String>,
	pub auth_token: String,
	pub connected_at: SystemTime,
	pub last_activity: SystemTime,
	pub tools: HashMap<String, ToolEntry>,
	pub resources: HashMap<String, ResourceEntry>,
	pub prompts: HashMap<String, PromptEntry>,
}

impl Session {
	pub fn new(id: String, auth_token: String, name: Option<String>, origin: Option<String>) -> Self {
		let now = SystemTime::now();
		Self {
			id,
			name,
			origin,
			page_title: None,
			auth_token,
			connected_at: now,
			last_activity: now,
			tools: HashMap::new(),
			resources: HashMap::new(),
			prompts: HashMap::new(),
		}
	}

	pub fn touch(&mut self) {
		self.last_activity = SystemTime::now();
	}

	/// Summary used for `list_sessions` / `available_sessions` payloads.
	pub fn summary(&self) -> Value {
		serde_json::json!({
			"sessionId": self.id,
			"name": self.name,
			"origin": self.origin,
			"pageTitle": self.page_title,
			"toolCount": self.tools.len(),
		})
	}
}

#[derive(Debug, Clone)]
pub enum ChangeEvent {
	SessionAttached { session_id: String, auth_token: String },
	SessionDetached { session_id: String, auth_token: String },
	ToolAdded { session_id: String, name: String },
	ToolRemoved { session_id: String, name: String },
	ResourceAdded { session_id: String, uri: String },
	ResourceRemoved { session_id: String, uri: String },
}

pub struct SessionRegistry {
	by_id: RwLock<HashMap<String, Arc<RwLock<Session>>>>,
	by_auth: RwLock<HashMap<String, HashSet<String>>>,
	by_name: RwLock<HashMap<String, HashSet<String>>>,
	events: tokio::sync::broadcast::Sender<ChangeEvent>,
}

impl Default for SessionRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionRegistry {
	pub fn new() -> Self {
		let (events, _) = tokio::sync::broadcast::channel(1024);
		Self {
			by_id: RwLock::new(HashMap::new()),
			by_auth: RwLock::new(HashMap::new()),
			by_name: RwLock::new(HashMap::new()),
			events,
		}
	}

	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ChangeEvent> {
		self.events.subscribe()
	}

	fn emit(&self, event: ChangeEvent) {
		// A lagging subscriber is the fan-out's problem (it will see
		// `Lagged` and can resync against a fresh snapshot); the registry
		// itself never blocks on slow consumers.
		let _ = self.events.send(event);
	}

	/// Attach a new session. Fails only on a collision within a *live*
	/// `session_name` bucket (the newcomer is rejected so its frontend can
	/// pick an alternative name, per spec §4.1).
	pub fn attach(&self, session: Session) -> Result<Arc<RwLock<Session>>, BridgeError> {
		if let Some(name) = session.name.clone() {
			let by_name = self.by_name.read();
			if let Some(existing) = by_name.get(&name) {
				if !existing.is_empty() {
					return Err(BridgeError::SessionNameAlreadyInUse(name));
				}
			}
		}

		let id = session.id.clone();
		let auth_token = session.auth_token.clone();
		let name = session.name.clone();
		let handle = Arc::new(RwLock::new(session));

		self.by_id.write().insert(id.clone(), handle.clone());
		self
			.by_auth
			.write()
			.entry(auth_token.clone())
			.or_default()
			.insert(id.clone());
		if let Some(name) = name {
			self.by_name.write().entry(name).or_default().insert(id.clone());
		}

		self.emit(ChangeEvent::SessionAttached {
			session_id: id,
			auth_token,
		});
		Ok(handle)
	}

	pub fn detach(&self, session_id: &str) {
		let Some(handle) = self.by_id.write().remove(session_id) else {
			return;
		};
		let session = handle.read();
		let auth_token = session.auth_token.clone();
		self
			.by_auth
			.write()
			.entry(auth_token.clone())
			.or_default()
			.remove(session_id);
		if let Some(name) = &session.name {
			self.by_name.write().entry(name.clone()).or_default().remove(session_id);
		}
		drop(session);

		self.emit(ChangeEvent::SessionDetached {
			session_id: session_id.to_string(),
			auth_token,
		});
	}

	pub fn get(&self, session_id: &str) -> Option<Arc<RwLock<Session>>> {
		self.by_id.read().get(session_id).cloned()
	}

	pub fn find_by_auth(&self, token: &str) -> Vec<Arc<RwLock<Session>>> {
		let ids = self.by_auth.read().get(token).cloned().unwrap_or_default();
		let by_id = self.by_id.read();
		ids.iter().filter_map(|id| by_id.get(id).cloned()).collect()
	}

	pub fn find_by_name(&self, name: &str) -> Vec<Arc<RwLock<Session>>> {
		let ids = self.by_name.read().get(name).cloned().unwrap_or_default();
		let by_id = self.by_id.read();
		ids.iter().filter_map(|id| by_id.get(id).cloned()).collect()
	}

	/// Other live sessions sharing `session_name` with `session_id`, used by
	/// C9 to find schema-conflict siblings.
	pub fn siblings_by_name(&self, name: &str, exclude_session_id: &str) -> Vec<Arc<RwLock<Session>>> {
		self
			.find_by_name(name)
			.into_iter()
			.filter(|s| s.read().id != exclude_session_id)
			.collect()
	}

	pub fn for_each<F: FnMut(&Session)>(&self, mut f: F) {
		let by_id = self.by_id.read();
		for handle in by_id.values() {
			f(&handle.read());
		}
	}

	pub fn record_tool_added(&self, session_id: &str, name: &str) {
		self.emit(ChangeEvent::ToolAdded {
			session_id: session_id.to_string(),
			name: name.to_string(),
		});
	}

	pub fn record_tool_removed(&self, session_id: &str, name: &str) {
		self.emit(ChangeEvent::ToolRemoved {
			session_id: session_id.to_string(),
			name: name.to_string(),
		});
	}

	pub fn record_resource_added(&self, session_id: &str, uri: &str) {
		self.emit(ChangeEvent::ResourceAdded {
			session_id: session_id.to_string(),
			uri: uri.to_string(),
		});
	}

	pub fn record_resource_removed(&self, session_id: &str, uri: &str) {
		self.emit(ChangeEvent::ResourceRemoved {
			session_id: session_id.to_string(),
			uri: uri.to_string(),
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn new_session(id: &str, token: &str, name: Option<&str>) -> Session {
		Session::new(id.to_string(), token.to_string(), name.map(str::to_string), None)
	}

	#[test]
	fn attach_and_find_by_auth() {
		let reg = SessionRegistry::new();
		reg.attach(new_session("s1", "tok-a", None)).unwrap();
		reg.attach(new_session("s2", "tok-a", None)).unwrap();
		reg.attach(new_session("s3", "tok-b", None)).unwrap();

		assert_eq!(reg.find_by_auth("tok-a").len(), 2);
		assert_eq!(reg.find_by_auth("tok-b").len(), 1);
		assert!(reg.find_by_auth("tok-missing").is_empty());
	}

	#[test]
	fn name_collision_among_live_sessions_is_rejected() {
		let reg = SessionRegistry::new();
		reg.attach(new_session("s1", "tok-a", Some("studio"))).unwrap();
		let err = reg.attach(new_session("s2", "tok-b", Some("studio"))).unwrap_err();
		assert_eq!(err, BridgeError::SessionNameAlreadyInUse("studio".into()));
	}

	#[test]
	fn detach_frees_the_name_for_reuse() {
		let reg = SessionRegistry::new();
		reg.attach(new_session("s1", "tok-a", Some("studio"))).unwrap();
		reg.detach("s1");
		reg.attach(new_session("s2", "tok-b", Some("studio"))).unwrap();
		assert_eq!(reg.find_by_name("studio").len(), 1);
	}

	#[test]
	fn detach_is_observable_as_a_change_event() {
		let reg = SessionRegistry::new();
		let mut rx = reg.subscribe();
		reg.attach(new_session("s1", "tok-a", None)).unwrap();
		reg.detach("s1");

		let first = rx.try_recv().unwrap();
		assert!(matches!(first, ChangeEvent::SessionAttached { .. }));
		let second = rx.try_recv().unwrap();
		assert!(matches!(second, ChangeEvent::SessionDetached { .. }));
	}

	#[test]
	fn siblings_by_name_excludes_self() {
		let reg = SessionRegistry::new();
		reg.attach(new_session("s1", "tok-a", Some("studio"))).unwrap();
		reg.attach(new_session("s2", "tok-b", Some("studio"))).unwrap();
		let siblings = reg.siblings_by_name("studio", "s1");
		assert_eq!(siblings.len(), 1);
		assert_eq!(siblings[0].read().id, "s2");
	}
}
