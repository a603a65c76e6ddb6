use std::sync::Arc;

use arcgate::alias_cache::IndexAliasCache;
use arcgate::analytics::{AnalyticsCollector, AnalyticsConfig};
use arcgate::config::GatewayConfig;
use arcgate::engine::EngineClient;
use arcgate::functions::{DisabledInvoker, FunctionCache, FunctionInvoker, OpenFaasInvoker};
use arcgate::identity::{EngineIdentityStore, Identity, IdentityStore};
use arcgate::logs::LogWriter;
use arcgate::metrics::GatewayMetrics;
use arcgate::ratelimit::{CounterStore, MemoryCounterStore, RateLimiter};
use arcgate::reindex::Reindexer;
use arcgate::routes::RouteTable;
use arcgate::rules::RuleStore;
use tokio::sync::Notify;

use crate::capabilities;

/// Shared state handed to every middleware and handler.
pub struct AppState {
    pub config: GatewayConfig,
    pub engine: EngineClient,
    /// Classification table assembled from every capability.
    pub routes: RouteTable,
    pub identities: Arc<dyn IdentityStore>,
    /// Admin identity built from `ARC_USERNAME`/`ARC_PASSWORD`.
    pub master: Option<Arc<Identity>>,
    pub limiter: RateLimiter,
    pub metrics: GatewayMetrics,
    pub aliases: Arc<IndexAliasCache>,
    pub rules: RuleStore,
    pub functions: Arc<FunctionCache>,
    pub invoker: Arc<dyn FunctionInvoker>,
    pub logs: LogWriter,
    pub analytics: Arc<AnalyticsCollector>,
    pub reindexer: Reindexer,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    /// Production wiring: engine-backed identities, in-memory rate counters,
    /// OpenFaaS functions when a gateway is configured.
    pub fn new(config: GatewayConfig) -> arcgate::Result<Self> {
        let engine = EngineClient::new(&config)?;
        let identities: Arc<dyn IdentityStore> =
            Arc::new(EngineIdentityStore::new(engine.clone(), &config));
        Self::with_parts(
            config,
            engine,
            identities,
            Arc::new(MemoryCounterStore::new()),
            AnalyticsConfig::from_gateway,
        )
    }

    /// Wiring with explicit identity and counter stores.
    pub fn with_parts(
        config: GatewayConfig,
        engine: EngineClient,
        identities: Arc<dyn IdentityStore>,
        counters: Arc<dyn CounterStore>,
        analytics_config: fn(&GatewayConfig) -> AnalyticsConfig,
    ) -> arcgate::Result<Self> {
        let metrics = GatewayMetrics::new()?;
        let aliases = Arc::new(IndexAliasCache::new());

        let invoker: Arc<dyn FunctionInvoker> = match &config.openfaas_gateway {
            Some(gateway) => Arc::new(OpenFaasInvoker::new(gateway, config.engine_timeout)?),
            None => Arc::new(DisabledInvoker),
        };

        let master = config
            .master_credentials()
            .map(|(user, pass)| Arc::new(Identity::master(user, pass)));

        Ok(Self {
            routes: capabilities::route_table(),
            limiter: RateLimiter::new(counters).with_metrics(metrics.clone()),
            rules: RuleStore::new(engine.clone()),
            functions: Arc::new(FunctionCache::new()),
            logs: LogWriter::new(config.queue_capacity, &metrics),
            analytics: AnalyticsCollector::new(analytics_config(&config), &metrics),
            reindexer: Reindexer::new(engine.clone(), aliases.clone(), &config),
            shutdown: Arc::new(Notify::new()),
            identities,
            master,
            invoker,
            aliases,
            metrics,
            engine,
            config,
        })
    }

    pub fn with_invoker(mut self, invoker: Arc<dyn FunctionInvoker>) -> Self {
        self.invoker = invoker;
        self
    }
}
