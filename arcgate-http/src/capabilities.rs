//! Capability registry.
//!
//! Each capability contributes classification metadata for its routes, the
//! handlers behind them, optional public (unauthenticated, unlogged) routes
//! and an optional startup hook. The engine proxy comes last: it only adds
//! metadata, and its handler is the router fallback.

use std::sync::Arc;

use arcgate::logs::RollingFileSink;
use arcgate::routes::{engine_routes, RouteSpec, RouteTable};
use arcgate::types::{Acl, Category, Operation};
use arcgate::DEFAULT_TENANT;
use axum::{
    http::Method,
    routing::{get, post, MethodRouter},
    Router,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::chain::Chain;
use crate::handlers;
use crate::openapi::ApiDoc;
use crate::state::AppState;

/// A route and, unless it is classification-only, its handler.
pub struct GatewayRoute {
    pub spec: RouteSpec,
    pub handler: Option<MethodRouter<Arc<AppState>>>,
}

impl GatewayRoute {
    fn new(spec: RouteSpec, handler: MethodRouter<Arc<AppState>>) -> Self {
        Self {
            spec,
            handler: Some(handler),
        }
    }

    fn metadata(spec: RouteSpec) -> Self {
        Self {
            spec,
            handler: None,
        }
    }
}

pub struct Capability {
    pub name: &'static str,
    pub routes: fn() -> Vec<GatewayRoute>,
    pub public: Option<fn() -> Router<Arc<AppState>>>,
    pub init: Option<fn(&Arc<AppState>)>,
}

const GET: Method = Method::GET;
const POST: Method = Method::POST;
const PUT: Method = Method::PUT;
const DELETE: Method = Method::DELETE;

/// Registration order; the proxy must stay last.
pub const CAPABILITIES: &[Capability] = &[
    Capability {
        name: "reactivesearch",
        routes: reactivesearch_routes,
        public: None,
        init: None,
    },
    Capability {
        name: "logs",
        routes: logs_routes,
        public: None,
        init: Some(start_log_writer),
    },
    Capability {
        name: "analytics",
        routes: analytics_routes,
        public: None,
        init: Some(start_analytics),
    },
    Capability {
        name: "reindex",
        routes: reindex_routes,
        public: None,
        init: Some(warm_alias_cache),
    },
    Capability {
        name: "rules",
        routes: rules_routes,
        public: None,
        init: None,
    },
    Capability {
        name: "functions",
        routes: Vec::new,
        public: None,
        init: Some(start_function_refresh),
    },
    Capability {
        name: "admin",
        routes: Vec::new,
        public: Some(admin_router),
        init: None,
    },
    Capability {
        name: "proxy",
        routes: proxy_routes,
        public: None,
        init: None,
    },
];

fn reactivesearch_routes() -> Vec<GatewayRoute> {
    let spec = |methods: &[Method], template: &str| {
        RouteSpec::new(methods, template, Category::ReactiveSearch, Acl::Search)
            .with_operation(Operation::Read)
    };
    vec![
        GatewayRoute::new(
            spec(&[POST], "/{index}/_reactivesearch"),
            post(handlers::reactivesearch::search),
        ),
        GatewayRoute::new(
            spec(&[POST], "/{index}/_reactivesearch/validate"),
            post(handlers::reactivesearch::validate),
        ),
        GatewayRoute::new(
            spec(&[GET], "/_reactivesearch/schema"),
            get(handlers::reactivesearch::query_schema),
        ),
    ]
}

fn logs_routes() -> Vec<GatewayRoute> {
    let spec = |template: &str| RouteSpec::new(&[GET], template, Category::Logs, Acl::Logs);
    vec![
        GatewayRoute::new(spec("/_logs"), get(handlers::logs::list_logs)),
        GatewayRoute::new(spec("/_logs/search"), get(handlers::logs::list_logs)),
        GatewayRoute::new(spec("/{index}/_logs"), get(handlers::logs::index_logs)),
        GatewayRoute::new(
            spec("/{index}/_logs/search"),
            get(handlers::logs::index_logs),
        ),
        GatewayRoute::new(spec("/log/{id}"), get(handlers::logs::get_log_record)),
    ]
}

fn analytics_routes() -> Vec<GatewayRoute> {
    vec![GatewayRoute::new(
        RouteSpec::new(&[GET], "/_analytics/{view}", Category::Analytics, Acl::Analytics),
        get(handlers::analytics::view),
    )]
}

fn reindex_routes() -> Vec<GatewayRoute> {
    let spec = |methods: &[Method], template: &str| {
        RouteSpec::new(methods, template, Category::Reindex, Acl::Indices)
    };
    vec![
        GatewayRoute::new(
            spec(&[POST], "/_reindex/{source}"),
            post(handlers::reindex::reindex),
        ),
        GatewayRoute::new(
            spec(&[POST], "/_reindex/{source}/{destination}"),
            post(handlers::reindex::clone_index),
        ),
        GatewayRoute::new(
            spec(&[GET], "/_reindex/tasks"),
            get(handlers::reindex::list_tasks),
        ),
    ]
}

fn rules_routes() -> Vec<GatewayRoute> {
    vec![
        GatewayRoute::new(
            RouteSpec::new(
                &[GET, PUT, DELETE],
                "/{index}/_rule/{id}",
                Category::Rules,
                Acl::Rules,
            ),
            get(handlers::rules::get_rule)
                .put(handlers::rules::save_rule)
                .delete(handlers::rules::delete_rule),
        ),
        GatewayRoute::new(
            RouteSpec::new(&[GET], "/{index}/_rules", Category::Rules, Acl::Rules),
            get(handlers::rules::list_rules),
        ),
    ]
}

fn proxy_routes() -> Vec<GatewayRoute> {
    engine_routes()
        .into_iter()
        .map(GatewayRoute::metadata)
        .collect()
}

fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/arc/health", get(handlers::health))
        .route("/arc/metrics", get(handlers::metrics))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}

/// Classification table over every capability's routes.
pub fn route_table() -> RouteTable {
    let mut table = RouteTable::new();
    for capability in CAPABILITIES {
        table.extend((capability.routes)().into_iter().map(|r| r.spec));
    }
    table
}

/// The full application: public routes, then every gated route and the
/// proxy fallback wrapped in the gateway chain.
pub fn router(state: &Arc<AppState>) -> Router {
    let mut gated: Router<Arc<AppState>> = Router::new();
    let mut public: Router<Arc<AppState>> = Router::new();
    for capability in CAPABILITIES {
        for route in (capability.routes)() {
            if let Some(handler) = route.handler {
                gated = gated.route(&route.spec.template.axum_path(), handler);
            }
        }
        if let Some(public_routes) = capability.public {
            public = public.merge(public_routes());
        }
    }
    let gated = Chain::gateway().wrap(gated.fallback(handlers::proxy), state);
    public.merge(gated).with_state(state.clone())
}

/// Run every capability's startup hook.
pub fn init_all(state: &Arc<AppState>) {
    for capability in CAPABILITIES {
        if let Some(init) = capability.init {
            tracing::debug!("[capabilities] starting {}", capability.name);
            init(state);
        }
    }
}

fn start_log_writer(state: &Arc<AppState>) {
    let sink = RollingFileSink::new(
        state.config.log_file_path.clone(),
        state.config.log_max_file_bytes,
        state.config.log_max_age,
    );
    tokio::spawn(state.logs.clone().run(
        sink,
        Some(state.engine.clone()),
        state.config.logs_index.clone(),
    ));
}

fn start_analytics(state: &Arc<AppState>) {
    tokio::spawn(state.analytics.clone().run_flush_loop(state.engine.clone()));
}

fn start_function_refresh(state: &Arc<AppState>) {
    let functions = state.functions.clone();
    let engine = state.engine.clone();
    let index = state.config.functions_index.clone();
    let interval = state.config.plan_refresh_interval;
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match functions.refresh(&engine, &index).await {
            Ok(n) => tracing::info!("[functions] loaded {} functions", n),
            Err(e) => tracing::error!("[functions] initial load failed: {}", e),
        }
        functions
            .run_refresh_loop(engine, index, interval, shutdown)
            .await;
    });
}

fn warm_alias_cache(state: &Arc<AppState>) {
    let aliases = state.aliases.clone();
    let engine = state.engine.clone();
    tokio::spawn(async move {
        match aliases.refresh(DEFAULT_TENANT, &engine).await {
            Ok(n) => tracing::info!("[reindex] cached {} aliases", n),
            Err(e) => tracing::warn!("[reindex] failed to load aliases: {}", e),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_registered_last() {
        assert_eq!(CAPABILITIES.last().map(|c| c.name), Some("proxy"));
    }

    #[test]
    fn test_gateway_routes_win_over_engine_routes() {
        let table = route_table();
        let m = table
            .find(&Method::POST, "/books/_reactivesearch")
            .unwrap();
        assert_eq!(m.spec.category, Category::ReactiveSearch);

        let m = table.find(&Method::POST, "/_reindex/books").unwrap();
        assert_eq!(m.spec.category, Category::Reindex);
        assert_eq!(m.indices(), vec!["books".to_string()]);

        let m = table.find(&Method::GET, "/books/_search").unwrap();
        assert_eq!(m.spec.category, Category::Search);
    }

    #[test]
    fn test_rule_routes_take_operation_from_method() {
        let table = route_table();
        let m = table.find(&Method::DELETE, "/books/_rule/r1").unwrap();
        assert_eq!(m.spec.category, Category::Rules);
        assert_eq!(m.spec.operation_for(&Method::DELETE), Operation::Delete);
    }
}
