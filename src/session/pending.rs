//! C3 — Pending-Call Table (spec §4.3).
//!
//! Associates a bridge-generated `request_id` with the oneshot sender that
//! resumes whichever C5 handler is awaiting the frontend's reply. A
//! background timer enforces the per-call deadline; if the owning session
//! detaches first, its pending calls fail with `SessionGone` instead of
//! timing out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingCallKind {
	ToolCall,
	ResourceRead,
	PromptGet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PendingOutcome {
	Ok(Value),
	Err(String),
	Timeout,
	SessionGone,
}

struct PendingCall {
	session_id: String,
	#[allow(dead_code)]
	kind: PendingCallKind,
	reply: Option<tokio::sync::oneshot::Sender<PendingOutcome>>,
}

#[derive(Default)]
pub struct PendingCallTable {
	next_id: AtomicU64,
	calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCallTable {
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			next_id: AtomicU64::new(1),
			calls: Mutex::new(HashMap::new()),
		})
	}

	/// Register a call and spawn its deadline timer. Returns the assigned
	/// `request_id` and a future that resolves to the call's outcome.
	pub fn register(
		self: &Arc<Self>,
		session_id: impl Into<String>,
		kind: PendingCallKind,
		deadline: Duration,
	) -> (u64, tokio::sync::oneshot::Receiver<PendingOutcome>) {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = tokio::sync::oneshot::channel();
		self.calls.lock().insert(
			id,
			PendingCall {
				session_id: session_id.into(),
				kind,
				reply: Some(tx),
			},
		);

		let table = self.clone();
		tokio::spawn(async move {
			tokio::time::sleep(deadline).await;
			table.resolve(id, PendingOutcome::Timeout);
		});

		(id, rx)
	}

	/// Complete a pending call. `request_id` must belong to `session_id` —
	/// a response from any other session is silently rejected (spec §3
	/// invariant: "accepted iff its request_id matches a live PendingCall
	/// for that same session_id").
	pub fn complete(&self, session_id: &str, request_id: u64, result: Result<Value, String>) -> bool {
		let mut calls = self.calls.lock();
		let Some(call) = calls.get(&request_id) else {
			return false;
		};
		if call.session_id != session_id {
			return false;
		}
		let mut call = calls.remove(&request_id).unwrap();
		if let Some(tx) = call.reply.take() {
			let outcome = match result {
				Ok(v) => PendingOutcome::Ok(v),
				Err(e) => PendingOutcome::Err(e),
			};
			let _ = tx.send(outcome);
		}
		true
	}

	fn resolve(&self, request_id: u64, outcome: PendingOutcome) {
		let mut calls = self.calls.lock();
		if let Some(mut call) = calls.remove(&request_id) {
			if let Some(tx) = call.reply.take() {
				let _ = tx.send(outcome);
			}
		}
	}

	/// Fail every pending call owned by a session that just detached.
	pub fn fail_all_for_session(&self, session_id: &str) {
		let mut calls = self.calls.lock();
		let ids: Vec<u64> = calls
			.iter()
			.filter(|(_, c)| c.session_id == session_id)
			.map(|(id, _)| *id)
			.collect();
		for id in ids {
			if let Some(mut call) = calls.remove(&id) {
				if let Some(tx) = call.reply.take() {
					let _ = tx.send(PendingOutcome::SessionGone);
				}
			}
		}
	}

	pub fn pending_count(&self) -> usize {
		self.calls.lock().len()
	}
}
