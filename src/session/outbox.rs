//! Per-session outbound queue feeding one frontend's duplex channel.
//!
//! C5 (tool dispatch) and C7 (query relay) both need to push a frame at a
//! session whose `FrontendLink::run` loop they are not inside. Registering
//! an unbounded sender here, keyed by `session_id`, is how they reach it
//! without threading the link's own socket handle through every caller.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::session::link::OutboundMessage;
use crate::{Arc, BridgeError};

#[derive(Default)]
pub struct FrontendOutbox {
	senders: RwLock<HashMap<String, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl FrontendOutbox {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn register(&self, session_id: &str, tx: mpsc::UnboundedSender<OutboundMessage>) {
		self.senders.write().insert(session_id.to_string(), tx);
	}

	pub fn unregister(&self, session_id: &str) {
		self.senders.write().remove(session_id);
	}

	pub fn send(&self, session_id: &str, msg: OutboundMessage) -> Result<(), BridgeError> {
		let senders = self.senders.read();
		let tx = senders
			.get(session_id)
			.ok_or_else(|| BridgeError::SessionNotFound(session_id.to_string()))?;
		tx
			.send(msg)
			.map_err(|_| BridgeError::SessionNotFound(session_id.to_string()))
	}

	pub fn is_connected(&self, session_id: &str) -> bool {
		self.senders.read().contains_key(session_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn send_without_registration_fails_session_not_found() {
		let outbox = FrontendOutbox::new();
		let err = outbox
			.send("missing", OutboundMessage::Query { query: serde_json::Value::Null })
			.unwrap_err();
		assert_eq!(err, BridgeError::SessionNotFound("missing".into()));
	}

	#[test]
	fn registered_sender_receives_messages() {
		let outbox = FrontendOutbox::new();
		let (tx, mut rx) = mpsc::unbounded_channel();
		outbox.register("s1", tx);
		outbox
			.send("s1", OutboundMessage::Query { query: serde_json::json!({"uuid": "q1"}) })
			.unwrap();
		let msg = rx.try_recv().unwrap();
		assert!(matches!(msg, OutboundMessage::Query { .. }));
	}
}
