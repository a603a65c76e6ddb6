use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Arcgate API",
        version = "0.1.0",
        description = "Search gateway in front of an Elasticsearch-compatible cluster. Routes not listed here are proxied to the engine after authentication and authorization.",
        license(name = "MIT")
    ),
    servers(
        (url = "http://localhost:8000", description = "Local development")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::metrics,
        crate::handlers::reactivesearch::search,
        crate::handlers::reactivesearch::validate,
        crate::handlers::reactivesearch::query_schema,
        crate::handlers::logs::list_logs,
        crate::handlers::logs::index_logs,
        crate::handlers::logs::get_log_record,
        crate::handlers::analytics::view,
        crate::handlers::reindex::reindex,
        crate::handlers::reindex::clone_index,
        crate::handlers::reindex::list_tasks,
        crate::handlers::rules::get_rule,
        crate::handlers::rules::save_rule,
        crate::handlers::rules::delete_rule,
        crate::handlers::rules::list_rules,
    ),
    tags(
        (name = "health", description = "Health and metrics"),
        (name = "reactivesearch", description = "ReactiveSearch query translation"),
        (name = "logs", description = "Request log retrieval"),
        (name = "analytics", description = "Search analytics views"),
        (name = "reindex", description = "Zero-downtime reindexing"),
        (name = "rules", description = "Query rules"),
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "basic_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Basic,
                ),
            ),
        );
    }
}
