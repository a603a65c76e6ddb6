//! Query rules: per-index documents that promote, hide or inject hits when
//! the search term matches their `if` condition.

pub mod apply;
pub mod store;
pub mod types;

pub use apply::{Pin, RuleEffects};
pub use store::{rule_index, RuleStore};
pub use types::{compile_pattern, Action, Condition, Consequence, Operator, Payload, Rule};
