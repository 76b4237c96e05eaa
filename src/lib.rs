//! Bridge — multiplexes frontend UI sessions and MCP consumers behind one
//! public MCP endpoint, and coordinates agent queries that grant a remote
//! agent scoped, authenticated access back into a frontend's tools.

pub mod config;
pub mod error;
pub mod mcp;
pub mod query;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod transport;

// Commonly used across modules, re-exported so submodules can `use crate::*;`
// instead of repeating the same handful of imports in every file.
pub use std::sync::Arc;
pub use std::time::Duration;

pub use tracing::{debug, error, info, trace, warn};

pub use config::Config;
pub use error::BridgeError;
pub use state::AppState;

pub const SERVER_NAME: &str = "bridge";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
