//! Route templates, the route table and the engine route library.
//!
//! Templates use `{name}` placeholders and an optional trailing `{*rest}`
//! catch-all. Selection is deterministic: templates are ordered by fixed
//! component count (descending), then total component count (ascending), with
//! catch-all templates last; the first template that matches the path and
//! accepts the method wins.

use http::Method;

use crate::types::{Acl, Category, Operation};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Fixed(String),
    Var(String),
    CatchAll(String),
}

/// A parsed route template such as `/{index}/_doc/{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    raw: String,
    segments: Vec<Segment>,
}

/// Variable names whose values are index expressions.
const INDEX_VARS: &[&str] = &["index", "source", "destination"];

impl RouteTemplate {
    pub fn parse(raw: &str) -> Self {
        let segments = split_path(raw)
            .map(|part| {
                if let Some(name) = part.strip_prefix("{*").and_then(|p| p.strip_suffix('}')) {
                    Segment::CatchAll(name.to_string())
                } else if let Some(name) = part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                    Segment::Var(name.to_string())
                } else {
                    Segment::Fixed(part.to_string())
                }
            })
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn fixed_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Fixed(_)))
            .count()
    }

    pub fn total_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_catch_all(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::CatchAll(_)))
    }

    /// The same template in axum's `:name` / `*name` syntax.
    pub fn axum_path(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for seg in &self.segments {
            out.push('/');
            match seg {
                Segment::Fixed(s) => out.push_str(s),
                Segment::Var(name) => {
                    out.push(':');
                    out.push_str(name);
                }
                Segment::CatchAll(name) => {
                    out.push('*');
                    out.push_str(name);
                }
            }
        }
        out
    }

    /// Match a trimmed path, returning the captured variables in order.
    pub fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = split_path(path).collect();
        let mut params = Vec::new();
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                Segment::CatchAll(name) => {
                    params.push((name.clone(), parts.get(i..).unwrap_or(&[]).join("/")));
                    return Some(params);
                }
                Segment::Fixed(s) => {
                    if parts.get(i) != Some(&s.as_str()) {
                        return None;
                    }
                }
                Segment::Var(name) => {
                    let value = parts.get(i)?;
                    if INDEX_VARS.contains(&name.as_str()) && !is_index_token(value) {
                        return None;
                    }
                    params.push((name.clone(), decode(value)));
                }
            }
        }
        if parts.len() != self.segments.len() {
            return None;
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|p| !p.is_empty())
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Engine index names never start with `_`, except the `_all` wildcard.
pub fn is_index_token(value: &str) -> bool {
    !value.is_empty() && (!value.starts_with('_') || value == "_all")
}

/// Strict-slash normalisation: collapse repeated `/` and trim the trailing one.
pub fn clean_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for part in split_path(path) {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Classification metadata for one `(methods, template)` pair.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    /// Empty means every method.
    pub methods: Vec<Method>,
    pub template: RouteTemplate,
    pub category: Category,
    pub acl: Acl,
    /// `None` derives the operation from the HTTP method.
    pub operation: Option<Operation>,
}

impl RouteSpec {
    pub fn new(methods: &[Method], template: &str, category: Category, acl: Acl) -> Self {
        Self {
            methods: methods.to_vec(),
            template: RouteTemplate::parse(template),
            category,
            acl,
            operation: None,
        }
    }

    pub fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = Some(operation);
        self
    }

    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    pub fn operation_for(&self, method: &Method) -> Operation {
        self.operation
            .unwrap_or_else(|| Operation::from_method(method))
    }
}

#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub spec: &'a RouteSpec,
    pub params: Vec<(String, String)>,
}

impl RouteMatch<'_> {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Indices named by every index-typed path variable, comma-split.
    pub fn indices(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, value) in self
            .params
            .iter()
            .filter(|(k, _)| INDEX_VARS.contains(&k.as_str()))
        {
            for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !out.iter().any(|o| o == name) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }
}

/// Ordered route table.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteSpec>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, specs: impl IntoIterator<Item = RouteSpec>) {
        self.routes.extend(specs);
        self.sort();
    }

    fn sort(&mut self) {
        // Stable, so declaration order breaks remaining ties.
        self.routes.sort_by(|a, b| {
            a.template
                .is_catch_all()
                .cmp(&b.template.is_catch_all())
                .then_with(|| b.template.fixed_count().cmp(&a.template.fixed_count()))
                .then_with(|| a.template.total_count().cmp(&b.template.total_count()))
        });
    }

    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    pub fn find(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        let path = clean_path(path);
        self.routes.iter().find_map(|spec| {
            if !spec.accepts(method) {
                return None;
            }
            spec.template
                .matches(&path)
                .map(|params| RouteMatch { spec, params })
        })
    }
}

/// Metadata for the engine's own API, used by the proxy capability.
pub fn engine_routes() -> Vec<RouteSpec> {
    use Category as C;
    const GET: Method = Method::GET;
    const POST: Method = Method::POST;
    const PUT: Method = Method::PUT;
    const DELETE: Method = Method::DELETE;
    const HEAD: Method = Method::HEAD;

    let mut specs = Vec::new();
    let mut add = |methods: &[Method], templates: &[&str], category: Category, acl: Acl| {
        for t in templates {
            specs.push(RouteSpec::new(methods, t, category, acl));
        }
    };

    add(&[POST, PUT], &["/_bulk", "/{index}/_bulk"], C::Bulk, Acl::Docs);
    add(&[GET, POST], &["/_search", "/{index}/_search"], C::Search, Acl::Search);
    add(
        &[GET, POST],
        &["/_search/template", "/{index}/_search/template"],
        C::SearchTemplate,
        Acl::Search,
    );
    add(&[GET, POST], &["/_msearch", "/{index}/_msearch"], C::Msearch, Acl::Search);
    add(&[GET, POST], &["/_count", "/{index}/_count"], C::Count, Acl::Search);
    add(
        &[GET, POST],
        &["/_validate/query", "/{index}/_validate/query"],
        C::Validate,
        Acl::Search,
    );
    add(&[GET, POST], &["/{index}/_explain/{id}"], C::Explain, Acl::Search);
    add(
        &[GET, POST],
        &["/_field_caps", "/{index}/_field_caps"],
        C::FieldCaps,
        Acl::Search,
    );
    add(
        &[GET, HEAD, PUT, POST, DELETE],
        &["/{index}/_doc/{id}", "/{index}/_create/{id}"],
        C::Doc,
        Acl::Docs,
    );
    add(&[POST], &["/{index}/_doc"], C::Doc, Acl::Docs);
    add(&[GET, HEAD], &["/{index}/_source/{id}"], C::Source, Acl::Docs);
    add(&[GET, POST], &["/_mget", "/{index}/_mget"], C::Mget, Acl::Docs);
    add(&[POST], &["/{index}/_update/{id}"], C::Update, Acl::Docs);
    add(
        &[GET, POST],
        &["/{index}/_termvectors", "/{index}/_termvectors/{id}"],
        C::TermVectors,
        Acl::Docs,
    );
    add(&[POST], &["/{index}/_update_by_query"], C::UpdateByQuery, Acl::Docs);
    add(&[POST], &["/{index}/_delete_by_query"], C::DeleteByQuery, Acl::Docs);
    add(&[POST], &["/_reindex"], C::Reindex, Acl::Docs);

    add(&[GET], &["/_cat", "/_cat/{kind}", "/_cat/{kind}/{target}"], C::Cat, Acl::Cat);
    add(
        &[],
        &["/_cluster/{kind}", "/_cluster/{kind}/{target}"],
        C::Cluster,
        Acl::Clusters,
    );
    add(
        &[GET],
        &["/_nodes", "/_nodes/{node}", "/_nodes/{node}/{metric}"],
        C::Nodes,
        Acl::Clusters,
    );
    add(
        &[],
        &["/_snapshot", "/_snapshot/{repo}", "/_snapshot/{repo}/{snapshot}"],
        C::Snapshot,
        Acl::Clusters,
    );
    add(&[GET, POST], &["/_tasks", "/_tasks/{task}", "/_tasks/{task}/_cancel"], C::Tasks, Acl::Clusters);

    add(
        &[],
        &[
            "/_alias",
            "/_alias/{name}",
            "/_aliases",
            "/{index}/_alias",
            "/{index}/_alias/{name}",
            "/{index}/_aliases/{name}",
        ],
        C::Alias,
        Acl::Indices,
    );
    add(
        &[GET, PUT, POST],
        &["/_mapping", "/{index}/_mapping", "/{index}/_mapping/field/{field}"],
        C::Mapping,
        Acl::Indices,
    );
    add(
        &[GET, PUT],
        &["/_settings", "/{index}/_settings", "/{index}/_settings/{name}"],
        C::Settings,
        Acl::Indices,
    );
    add(&[GET, POST], &["/_analyze", "/{index}/_analyze"], C::Analyze, Acl::Indices);
    add(&[GET, POST], &["/_refresh", "/{index}/_refresh"], C::Refresh, Acl::Indices);
    add(&[GET, POST], &["/_flush", "/{index}/_flush"], C::Flush, Acl::Indices);
    add(&[POST], &["/_forcemerge", "/{index}/_forcemerge"], C::ForceMerge, Acl::Indices);
    add(
        &[GET],
        &["/_stats", "/_stats/{metric}", "/{index}/_stats", "/{index}/_stats/{metric}"],
        C::Stats,
        Acl::Indices,
    );
    add(
        &[],
        &[
            "/_template",
            "/_template/{name}",
            "/_index_template",
            "/_index_template/{name}",
        ],
        C::Template,
        Acl::Indices,
    );
    add(&[], &["/{index}"], C::Indices, Acl::Indices);

    add(&[], &["/_scripts/{id}"], C::Scripts, Acl::Misc);
    add(&[], &["/_ingest/pipeline", "/_ingest/pipeline/{id}"], C::Ingest, Acl::Misc);

    // Everything else, including the root banner, falls through to the proxy.
    specs.push(RouteSpec::new(&[], "/", C::Misc, Acl::Misc));
    specs.push(RouteSpec::new(&[], "/{*path}", C::Misc, Acl::Misc));
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        let mut t = RouteTable::new();
        t.extend(engine_routes());
        t
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/books/_search/"), "/books/_search");
        assert_eq!(clean_path("//books//_doc/1"), "/books/_doc/1");
        assert_eq!(clean_path(""), "/");
    }

    #[test]
    fn test_specific_beats_generic() {
        let t = table();
        let m = t.find(&Method::POST, "/books/_search").unwrap();
        assert_eq!(m.spec.category, Category::Search);
        assert_eq!(m.indices(), vec!["books"]);

        let m = t.find(&Method::GET, "/_cat/indices").unwrap();
        assert_eq!(m.spec.category, Category::Cat);
        assert!(m.indices().is_empty());

        let m = t.find(&Method::PUT, "/books").unwrap();
        assert_eq!(m.spec.category, Category::Indices);
    }

    #[test]
    fn test_method_filters_candidates() {
        let t = table();
        // _bulk only accepts POST/PUT; GET falls through to the catch-all.
        let m = t.find(&Method::GET, "/_bulk").unwrap();
        assert_eq!(m.spec.category, Category::Misc);
        assert!(m.spec.template.is_catch_all());
    }

    #[test]
    fn test_catch_all_is_last() {
        let t = table();
        let last = t.routes().last().unwrap();
        assert!(last.template.is_catch_all());
        let m = t.find(&Method::GET, "/_unknown/thing/here").unwrap();
        assert_eq!(m.param("path"), Some("_unknown/thing/here"));
    }

    #[test]
    fn test_ordering_rule() {
        let mut t = RouteTable::new();
        t.extend(vec![
            RouteSpec::new(&[], "/{index}/{id}", Category::Doc, Acl::Docs),
            RouteSpec::new(&[], "/{index}/_doc/{id}", Category::Doc, Acl::Docs),
            RouteSpec::new(&[], "/{index}/_search", Category::Search, Acl::Search),
        ]);
        let templates: Vec<&str> = t.routes().iter().map(|r| r.template.as_str()).collect();
        assert_eq!(
            templates,
            vec!["/{index}/_search", "/{index}/_doc/{id}", "/{index}/{id}"]
        );
    }

    #[test]
    fn test_multi_index_and_axum_path() {
        let t = table();
        let m = t.find(&Method::GET, "/a,b/_search").unwrap();
        assert_eq!(m.indices(), vec!["a", "b"]);
        assert_eq!(
            RouteTemplate::parse("/{index}/_doc/{id}").axum_path(),
            "/:index/_doc/:id"
        );
        assert_eq!(RouteTemplate::parse("/{*path}").axum_path(), "/*path");
    }

    #[test]
    fn test_every_index_variable_is_reported() {
        let mut t = RouteTable::new();
        t.extend(vec![RouteSpec::new(
            &[Method::POST],
            "/_reindex/{source}/{destination}",
            Category::Reindex,
            Acl::Indices,
        )]);
        let m = t.find(&Method::POST, "/_reindex/books/secret,books").unwrap();
        assert_eq!(m.indices(), vec!["books", "secret"]);
    }
}
