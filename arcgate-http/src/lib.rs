//! axum server for the arcgate search gateway.
//!
//! Every request not answered by a public route passes the gateway chain
//! (request id, classification, recording, authentication, rate limiting,
//! authorization, source filtering) before reaching a capability handler or
//! the engine proxy.

pub mod capabilities;
pub mod chain;
pub mod handlers;
pub mod interceptors;
pub mod middleware;
pub mod openapi;
pub mod recorder;
pub mod server;
pub mod state;

pub use server::{build_app, init_tracing, serve};
pub use state::AppState;
