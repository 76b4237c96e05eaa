//! C8 — Transport Adapters (spec §4.8). The bridge core (C1–C7, C9) is
//! transport-agnostic; this module is the one part of the crate that
//! knows about axum, WebSockets, and SSE bytes.

pub mod fanout;
pub mod http;

pub use http::build_router;
