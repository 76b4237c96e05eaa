//! C6 — Notification Fan-out (spec §4.6).
//!
//! One `McpSessionEntry` per live MCP session with an open SSE stream.
//! Pending notification kinds are coalesced into a `HashSet` — "at most one
//! pending event per kind per stream" — and a `tokio::sync::Notify` wakes
//! the SSE body generator, which drains the set each time it fires rather
//! than queueing every individual change event.
//!
//! The fan-out task itself (subscribing to `SessionRegistry::subscribe()`
//! and deciding which MCP sessions a given change affects) lives in
//! `transport`, since it needs both this table and the registry; this
//! module only owns the per-session coalescing primitive. The SSE byte
//! stream itself is built in `transport::http`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
	ToolsListChanged,
	ResourcesListChanged,
	PromptsListChanged,
}

impl NotificationKind {
	pub fn method(self) -> &'static str {
		match self {
			NotificationKind::ToolsListChanged => "notifications/tools/list_changed",
			NotificationKind::ResourcesListChanged => "notifications/resources/list_changed",
			NotificationKind::PromptsListChanged => "notifications/prompts/list_changed",
		}
	}
}

pub struct McpSessionEntry {
	pub id: String,
	pub auth_token: Option<String>,
	pub query_id: Option<String>,
	pending: Mutex<HashSet<NotificationKind>>,
	notify: Notify,
	closed: AtomicBool,
}

impl McpSessionEntry {
	fn signal(&self, kind: NotificationKind) {
		let mut pending = self.pending.lock();
		if pending.insert(kind) {
			drop(pending);
			self.notify.notify_one();
		}
	}

	pub fn close(&self) {
		self.closed.store(true, Ordering::SeqCst);
		self.notify.notify_one();
	}

	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Await the next coalesced batch of notification kinds, or `None` once
	/// closed with nothing left pending.
	async fn next_batch(&self) -> Option<Vec<NotificationKind>> {
		loop {
			{
				let mut pending = self.pending.lock();
				if !pending.is_empty() {
					return Some(pending.drain().collect());
				}
			}
			if self.is_closed() {
				return None;
			}
			self.notify.notified().await;
		}
	}
}

#[derive(Default)]
pub struct McpSessionTable {
	entries: RwLock<HashMap<String, Arc<McpSessionEntry>>>,
}

impl McpSessionTable {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn create(&self, auth_token: Option<String>, query_id: Option<String>) -> Arc<McpSessionEntry> {
		let id = uuid::Uuid::new_v4().to_string();
		let entry = Arc::new(McpSessionEntry {
			id: id.clone(),
			auth_token,
			query_id,
			pending: Mutex::new(HashSet::new()),
			notify: Notify::new(),
			closed: AtomicBool::new(false),
		});
		self.entries.write().insert(id, entry.clone());
		entry
	}

	pub fn get(&self, id: &str) -> Option<Arc<McpSessionEntry>> {
		self.entries.read().get(id).cloned()
	}

	pub fn remove(&self, id: &str) {
		if let Some(entry) = self.entries.write().remove(id) {
			entry.close();
		}
	}

	/// Deliver a change notice to every MCP session whose resolved scope
	/// includes `affected_session_id`. `in_scope` makes that call per entry
	/// (given its bound auth token / query id) — kept as a callback so this
	/// table doesn't need a `SessionRegistry` or `QueryEngine` reference of
	/// its own.
	pub fn notify_affected(&self, kind: NotificationKind, affected_session_id: &str, in_scope: impl Fn(&McpSessionEntry) -> bool) {
		let _ = affected_session_id;
		for entry in self.entries.read().values() {
			if in_scope(entry) {
				entry.signal(kind);
			}
		}
	}

	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Flatten one MCP session's coalesced batches into a stream of individual
/// notification kinds. `transport` wraps this in an SSE byte stream (with
/// keep-alive) for the actual HTTP response, since the wire-level framing
/// is its concern, not this table's.
pub fn notification_stream(entry: Arc<McpSessionEntry>) -> impl Stream<Item = NotificationKind> {
	futures_util::stream::unfold(entry, |entry| async move {
		let batch = entry.next_batch().await?;
		Some((batch, entry))
	})
	.flat_map(|batch| futures_util::stream::iter(batch))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_then_get_round_trips() {
		let table = McpSessionTable::new();
		let entry = table.create(Some("tok".into()), None);
		assert!(table.get(&entry.id).is_some());
	}

	#[test]
	fn remove_closes_the_entry() {
		let table = McpSessionTable::new();
		let entry = table.create(Some("tok".into()), None);
		table.remove(&entry.id);
		assert!(entry.is_closed());
	}

	#[tokio::test]
	async fn signal_coalesces_repeated_kinds() {
		let table = McpSessionTable::new();
		let entry = table.create(Some("tok".into()), None);
		table.notify_affected(NotificationKind::ToolsListChanged, "s1", |_| true);
		table.notify_affected(NotificationKind::ToolsListChanged, "s1", |_| true);
		let batch = entry.next_batch().await.unwrap();
		assert_eq!(batch, vec![NotificationKind::ToolsListChanged]);
	}

	#[tokio::test]
	async fn closed_with_nothing_pending_ends_the_stream() {
		let table = McpSessionTable::new();
		let entry = table.create(Some("tok".into()), None);
		table.remove(&entry.id);
		assert!(entry.next_batch().await.is_none());
	}
}
