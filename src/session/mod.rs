//! C1 (Session Registry), C2 (Frontend Link) and C3 (Pending-Call Table).
//!
//! A `Session` is one live frontend's presence in the bridge: its identity,
//! auth token, and the tool/resource/prompt tables it has declared. The
//! registry indexes sessions by id, by auth token, and by name; the link
//! owns the duplex wire framing for one frontend connection; the pending
//! table correlates outbound requests with their eventual responses.

pub mod link;
pub mod outbox;
pub mod pending;
pub mod registry;

pub use link::{FrontendLink, InboundMessage, OutboundMessage};
pub use outbox::FrontendOutbox;
pub use pending::{PendingCallKind, PendingCallTable};
pub use registry::{
	ChangeEvent, PromptEntry, ResourceEntry, Session, SessionRegistry, ToolEntry,
};
