//! Tails server
//!
//! HTTP front end for the tails broker: the SSE endpoint, static assets,
//! the status endpoint and command-line handling for the `tails` binary.

pub mod cli;
pub mod routes;
pub mod session;

pub use routes::{AppState, StatusReport, build_router};
pub use session::StreamConfig;
