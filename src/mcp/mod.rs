//! C4 (Auth & Scope Resolver), C5 (MCP Request Handler), C6 (Notification
//! Fan-out) and C9 (Tool-Conflict Arbiter).

pub mod auth;
pub mod conflict;
pub mod handler;
pub mod notify;
pub mod wire;
