//! Search analytics: session recording and aggregated views.
//!
//! Searches are recorded with a snapshot of their hits; later requests
//! carrying the same `X-Search-Id` add clicks, conversions and custom events.
//! Records land in a single index partitioned by the daily `datestamp` field.

pub mod collector;
pub mod config;
pub mod headers;
pub mod schema;
pub mod views;

pub use collector::{AnalyticsCollector, AnalyticsEvent};
pub use config::AnalyticsConfig;
pub use schema::{Interaction, SearchRecord};
pub use views::{run_view, View, ViewParams};
