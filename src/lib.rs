//! # arcgate
//!
//! Request-pipeline kernel for a search gateway that sits in front of an
//! Elasticsearch-compatible cluster.
//!
//! The crate holds everything that does not depend on a particular HTTP
//! server: request classification and the typed [`context::RequestContext`],
//! identities and authorization gates, rate limiting, the ReactiveSearch
//! translator, query rules, function interceptors, request logging, search
//! analytics and the reindex orchestrator. The `arcgate-http` crate wires
//! these into an axum server.
//!
//! ## Translating a ReactiveSearch request
//!
//! ```rust
//! use arcgate::reactivesearch::{translate, RSQuery};
//! use serde_json::json;
//!
//! # fn main() -> arcgate::Result<()> {
//! let rs: RSQuery = serde_json::from_value(json!({
//!     "query": [{"id": "B", "dataField": ["title"], "value": "harry", "size": 20}]
//! }))?;
//! let translation = translate(&rs)?;
//! assert_eq!(translation.msearch_payload().lines().count(), 2);
//! # Ok(())
//! # }
//! ```

#![recursion_limit = "256"]

pub mod access;
pub mod alias_cache;
pub mod analytics;
pub mod classify;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod functions;
pub mod identity;
pub mod logs;
pub mod metrics;
pub mod queue;
pub mod ratelimit;
pub mod reactivesearch;
pub mod reindex;
pub mod routes;
pub mod rules;
pub mod types;

pub use alias_cache::{IndexAliasCache, DEFAULT_TENANT};
pub use config::GatewayConfig;
pub use context::RequestContext;
pub use engine::{EngineClient, EngineResponse};
pub use error::{GatewayError, Result};
pub use identity::{EngineIdentityStore, Identity, IdentityStore, MemoryIdentityStore};
pub use metrics::GatewayMetrics;
pub use types::{Acl, Category, CredentialKind, Operation};
