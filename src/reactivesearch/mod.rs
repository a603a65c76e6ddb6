//! ReactiveSearch: a declarative query DSL translated to engine `_msearch`.

pub mod aggs;
pub mod geo;
pub mod range;
pub mod react;
pub mod response;
pub mod schema;
pub mod search;
pub mod term;
pub mod translate;
pub mod types;
pub mod validate;

pub use translate::{canonicalize, translate, TranslatedQuery, Translation};
pub use types::{DataField, Query, QueryType, RSQuery, Settings, SortBy};

impl RSQuery {
    /// Search term of the first executable `search`/`suggestion` node with a
    /// string value; used for rule lookup and analytics.
    pub fn search_term(&self) -> Option<String> {
        self.query
            .iter()
            .filter(|q| matches!(q.query_type, QueryType::Search | QueryType::Suggestion))
            .find_map(|q| {
                q.value
                    .as_ref()
                    .and_then(serde_json::Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
    }

    /// Term/range values of every node, for analytics filters.
    pub fn filters(&self) -> Vec<(String, serde_json::Value)> {
        self.query
            .iter()
            .filter(|q| matches!(q.query_type, QueryType::Term | QueryType::Range))
            .filter(|q| q.has_value())
            .filter_map(|q| {
                let field = q.data_fields().ok()?.first()?.field.clone();
                Some((field, q.value.clone()?))
            })
            .collect()
    }
}
