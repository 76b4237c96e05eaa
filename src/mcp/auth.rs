//! C4 — Auth & Scope Resolver (spec §4.4).
//!
//! A single `resolve` function turning a request's credentials into the
//! set of sessions it may address. Bearer-token resolution and
//! query-scoped resolution are mutually exclusive inputs: an absent or
//! empty bearer falls through to `_meta.queryId`, never both at once.

use parking_lot::RwLock;
use serde_json::Value;

use crate::query::QueryEngine;
use crate::session::registry::{Session, SessionRegistry};
use crate::{Arc, BridgeError};

#[derive(Debug, Clone)]
pub enum ToolAllowlist {
	All,
	Named(Vec<String>),
}

impl ToolAllowlist {
	pub fn allows(&self, name: &str) -> bool {
		match self {
			ToolAllowlist::All => true,
			ToolAllowlist::Named(names) => names.iter().any(|n| n == name),
		}
	}
}

pub enum ScopeDecision {
	Authenticated { candidates: Vec<Arc<RwLock<Session>>> },
	QueryScoped {
		query_id: String,
		candidate: Arc<RwLock<Session>>,
		allowlist: ToolAllowlist,
	},
	NeedSessionChoice { candidates: Vec<Arc<RwLock<Session>>> },
	Rejected(BridgeError),
}

/// Credentials and disambiguation hints carried by one inbound request,
/// pulled from headers and `_meta` by C5 before calling `resolve`.
pub struct RequestCredentials<'a> {
	pub bearer: Option<&'a str>,
	pub meta_session_id: Option<&'a str>,
	pub meta_query_id: Option<&'a str>,
}

pub fn resolve(creds: &RequestCredentials, registry: &SessionRegistry, queries: &QueryEngine) -> ScopeDecision {
	let bearer = creds.bearer.filter(|b| !b.is_empty());

	if bearer.is_none() {
		return match creds.meta_query_id {
			Some(query_id) => match queries.resolve_scope(query_id) {
				Ok((candidate, allowlist)) => ScopeDecision::QueryScoped {
					query_id: query_id.to_string(),
					candidate,
					allowlist,
				},
				Err(e) => ScopeDecision::Rejected(e),
			},
			None => ScopeDecision::Rejected(BridgeError::MissingAuthentication),
		};
	}

	let token = bearer.unwrap();
	let candidates = registry.find_by_auth(token);
	if candidates.is_empty() {
		return ScopeDecision::Rejected(BridgeError::InvalidAuthentication);
	}
	if candidates.len() == 1 {
		return ScopeDecision::Authenticated { candidates };
	}

	match creds.meta_session_id {
		Some(session_id) => match candidates.iter().find(|s| s.read().id == session_id) {
			Some(chosen) => ScopeDecision::Authenticated {
				candidates: vec![chosen.clone()],
			},
			None => ScopeDecision::Rejected(BridgeError::SessionNotFound(session_id.to_string())),
		},
		None => ScopeDecision::NeedSessionChoice { candidates },
	}
}

/// `available_sessions` payload for `SessionNotSpecified` / `NeedSessionChoice`
/// surfacing (spec §4.4, §7).
pub fn available_sessions(candidates: &[Arc<RwLock<Session>>]) -> Vec<Value> {
	candidates.iter().map(|s| s.read().summary()).collect()
}
