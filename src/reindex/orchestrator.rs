use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::naming::{next_reindexed_name, strip_system_settings, take_replicas};
use super::registry::TaskRegistry;
use super::types::{
    ReindexAction, ReindexConfig, ReindexOperation, ReindexOutcome, ReindexState, TaskTicket,
};
use crate::alias_cache::IndexAliasCache;
use crate::config::GatewayConfig;
use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};

/// Progress of an engine `_tasks/{id}` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed(String),
}

/// Read an engine `_tasks/{id}` body.
pub fn task_status(body: &Value) -> TaskStatus {
    if !body.get("completed").and_then(Value::as_bool).unwrap_or(false) {
        return TaskStatus::Running;
    }
    if let Some(err) = body.get("error") {
        let reason = err
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return TaskStatus::Failed(reason);
    }
    match body.pointer("/response/failures").and_then(Value::as_array) {
        Some(failures) if !failures.is_empty() => TaskStatus::Failed(failure_message(failures)),
        _ => TaskStatus::Succeeded,
    }
}

fn failure_message(failures: &[Value]) -> String {
    let first = &failures[0];
    let reason = first
        .pointer("/cause/reason")
        .and_then(Value::as_str)
        .unwrap_or("document failed to copy");
    format!("{} documents failed to reindex: {}", failures.len(), reason)
}

/// Build the engine `_reindex` body.
pub fn reindex_body(source: &str, destination: &str, config: &ReindexConfig) -> Value {
    let mut src = json!({ "index": source });
    if !config.include.is_empty() || !config.exclude.is_empty() {
        src["_source"] = json!({
            "includes": config.include,
            "excludes": config.exclude,
        });
    }
    let mut body = json!({
        "source": src,
        "dest": { "index": destination },
    });
    if let Some(script) = config.script.as_deref().filter(|s| !s.is_empty()) {
        body["script"] = json!({ "source": script, "lang": "painless" });
    }
    body
}

/// Per-run state that survives from preparation to finalization.
#[derive(Debug, Clone)]
struct Plan {
    tenant: String,
    source: String,
    destination: String,
    operation: ReindexOperation,
    /// Null when the destination was not created with forced replicas.
    replicas: Value,
    state: ReindexState,
}

impl Plan {
    fn advance(&mut self, next: ReindexState) {
        if self.state.can_advance_to(next) {
            tracing::debug!(
                "[reindex] {} -> {}: {:?} -> {:?}",
                self.source,
                self.destination,
                self.state,
                next
            );
            self.state = next;
        } else {
            tracing::warn!(
                "[reindex] illegal transition {:?} -> {:?} for {}",
                self.state,
                next,
                self.source
            );
        }
    }

    fn ticket(&self, task_id: String) -> TaskTicket {
        TaskTicket {
            task_id,
            tenant: self.tenant.clone(),
            source: self.source.clone(),
            destination: self.destination.clone(),
            operation: self.operation,
            replicas: self.replicas.clone(),
            state: self.state,
        }
    }

    fn from_ticket(ticket: &TaskTicket) -> Self {
        Self {
            tenant: ticket.tenant.clone(),
            source: ticket.source.clone(),
            destination: ticket.destination.clone(),
            operation: ticket.operation,
            replicas: ticket.replicas.clone(),
            state: ticket.state,
        }
    }
}

/// Drives copy-and-swap reindexing on the engine.
#[derive(Clone)]
pub struct Reindexer {
    engine: EngineClient,
    aliases: Arc<IndexAliasCache>,
    tasks: Arc<TaskRegistry>,
    search_relevancy_index: String,
    synonyms_index: String,
    poll_interval: Duration,
}

impl Reindexer {
    pub fn new(engine: EngineClient, aliases: Arc<IndexAliasCache>, config: &GatewayConfig) -> Self {
        Self {
            engine,
            aliases,
            tasks: Arc::new(TaskRegistry::new()),
            search_relevancy_index: config.search_relevancy_index.clone(),
            synonyms_index: config.synonyms_index.clone(),
            poll_interval: config.reindex_poll_interval,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.tasks
    }

    /// Concrete index behind `name`. An alias spanning several indices is
    /// rejected since there is no single source to copy.
    pub async fn resolve_source(&self, tenant: &str, name: &str) -> Result<String> {
        if let Some(index) = self.aliases.index_for_alias(tenant, name) {
            return Ok(index);
        }
        let mut indices = self.engine.resolve_alias(name).await?;
        match indices.len() {
            0 => {
                if self.engine.index_exists(name).await? {
                    Ok(name.to_string())
                } else {
                    Err(GatewayError::NotFound(format!("index {} not found", name)))
                }
            }
            1 => Ok(indices.remove(0)),
            _ => Err(GatewayError::Validation(format!(
                "alias {} points to more than one index: {}",
                name,
                indices.join(", ")
            ))),
        }
    }

    /// Copy `source` into a new index. Without `destination` the new index is
    /// auto-named and replaces the source; with one the source is kept.
    pub async fn reindex(
        &self,
        tenant: &str,
        source: &str,
        destination: Option<String>,
        config: ReindexConfig,
        wait_for_completion: bool,
    ) -> Result<ReindexOutcome> {
        let source = self.resolve_source(tenant, source).await?;

        let claim = match self.tasks.claim(tenant, &source) {
            Ok(claim) => claim,
            Err(Some(running)) => {
                tracing::info!(
                    "[reindex] {} already running as task {}",
                    source,
                    running.task_id
                );
                return Ok(ReindexOutcome::Accepted(running));
            }
            Err(None) => {
                return Err(GatewayError::Conflict(format!(
                    "a reindex of {} is already being started",
                    source
                )))
            }
        };

        let (destination, operation) = match destination.filter(|d| !d.is_empty()) {
            Some(dest) if dest == source => {
                return Err(GatewayError::Validation(
                    "destination must differ from the source index".into(),
                ))
            }
            Some(dest) => (dest, ReindexOperation::ReindexWithClone),
            None => (
                next_reindexed_name(&source),
                ReindexOperation::ReindexWithDelete,
            ),
        };

        let mut plan = Plan {
            tenant: tenant.to_string(),
            source,
            destination,
            operation,
            replicas: Value::Null,
            state: ReindexState::Initial,
        };

        if let Err(e) = self.prepare(&mut plan, &config).await {
            plan.advance(ReindexState::Failed);
            return Err(e);
        }
        plan.advance(ReindexState::Prepared);

        if !config.wants(ReindexAction::Data) {
            plan.advance(ReindexState::Completed);
            let aliases = self.finalize(&mut plan, &config).await?;
            return Ok(self.completed(plan, aliases));
        }

        let body = reindex_body(&plan.source, &plan.destination, &config);
        plan.advance(ReindexState::Reindexing);

        if wait_for_completion {
            let outcome = match self.engine.reindex(&body, true).await {
                Ok(resp) => match resp.get("failures").and_then(Value::as_array) {
                    Some(failures) if !failures.is_empty() => {
                        Err(GatewayError::Internal(failure_message(failures)))
                    }
                    _ => Ok(()),
                },
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                plan.advance(ReindexState::Failed);
                self.discard_destination(&plan).await;
                return Err(e);
            }
            plan.advance(ReindexState::Completed);
            let aliases = self.finalize(&mut plan, &config).await?;
            return Ok(self.completed(plan, aliases));
        }

        let resp = match self.engine.reindex(&body, false).await {
            Ok(resp) => resp,
            Err(e) => {
                plan.advance(ReindexState::Failed);
                self.discard_destination(&plan).await;
                return Err(e);
            }
        };
        let task_id = resp
            .get("task")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Internal("engine did not return a task id".into()))?;

        let ticket = claim.register(plan.ticket(task_id));
        tracing::info!(
            "[reindex] {} -> {} running as task {}",
            ticket.source,
            ticket.destination,
            ticket.task_id
        );
        tokio::spawn(self.clone().watch(ticket.clone(), config));
        Ok(ReindexOutcome::Accepted(ticket))
    }

    /// Create the destination with the source's mappings and settings.
    async fn prepare(&self, plan: &mut Plan, config: &ReindexConfig) -> Result<()> {
        if config.data_only() {
            return Ok(());
        }

        let mappings = match (&config.mappings, config.wants(ReindexAction::Mappings)) {
            (Some(m), _) => Some(m.clone()),
            (None, true) => Some(self.engine.get_mappings(&plan.source).await?),
            (None, false) => None,
        };

        let mut settings = match &config.settings {
            Some(s) => strip_system_settings(s.get("index").unwrap_or(s)),
            None => {
                let current = self.engine.get_settings(&plan.source).await?;
                let stripped = strip_system_settings(&current);
                if config.wants(ReindexAction::Settings) {
                    stripped
                } else {
                    // The replica count is still needed to restore it later.
                    json!({ "number_of_replicas": stripped.get("number_of_replicas").cloned().unwrap_or(json!("1")) })
                }
            }
        };
        plan.replicas = take_replicas(&mut settings);

        let mut body = json!({ "settings": { "index": settings } });
        if let Some(mappings) = mappings.filter(|m| !m.is_null()) {
            body["mappings"] = mappings;
        }
        self.engine.create_index(&plan.destination, &body).await?;
        tracing::info!(
            "[reindex] created {} from {}",
            plan.destination,
            plan.source
        );
        Ok(())
    }

    /// Post-copy steps: relevancy and synonym bookkeeping, the alias swap for
    /// `reindex_with_delete`, then replica restore. Returns the aliases now
    /// pointing at the destination.
    async fn finalize(&self, plan: &mut Plan, config: &ReindexConfig) -> Result<Vec<String>> {
        if config.wants(ReindexAction::SearchRelevancy) {
            if let Err(e) = self.copy_search_relevancy(plan, config).await {
                tracing::warn!(
                    "[reindex] search relevancy copy for {} failed: {}",
                    plan.destination,
                    e
                );
            }
        }
        if config.wants(ReindexAction::Synonyms) {
            if let Err(e) = self.rewrite_synonyms(plan).await {
                tracing::warn!(
                    "[reindex] synonym update for {} failed: {}",
                    plan.destination,
                    e
                );
            }
        }

        let aliases = match plan.operation {
            ReindexOperation::ReindexWithClone => Vec::new(),
            ReindexOperation::ReindexWithDelete => match self.swap(plan).await {
                Ok(aliases) => aliases,
                Err(e) => {
                    plan.advance(ReindexState::Failed);
                    self.discard_destination(plan).await;
                    return Err(e);
                }
            },
        };

        if !plan.replicas.is_null() {
            let restore = json!({ "index": { "number_of_replicas": plan.replicas } });
            if let Err(e) = self.engine.put_settings(&plan.destination, &restore).await {
                tracing::error!(
                    "[reindex] failed to restore replicas on {}: {}",
                    plan.destination,
                    e
                );
            }
        }
        plan.advance(ReindexState::Finalized);
        Ok(aliases)
    }

    /// Delete the source and point its aliases at the destination in one
    /// atomic `_aliases` call. A source without aliases lends its own name.
    async fn swap(&self, plan: &Plan) -> Result<Vec<String>> {
        let mut aliases = self.engine.get_aliases(&plan.source).await?;
        if aliases.is_empty() {
            aliases.push(plan.source.clone());
        }
        let mut actions: Vec<Value> = aliases
            .iter()
            .map(|alias| json!({ "add": { "index": plan.destination, "alias": alias } }))
            .collect();
        actions.push(json!({ "remove_index": { "index": plan.source } }));
        self.engine.update_aliases(actions).await?;

        self.aliases.remove_index(&plan.tenant, &plan.source);
        for alias in &aliases {
            self.aliases.set_alias(&plan.tenant, alias, &plan.destination);
        }
        tracing::info!(
            "[reindex] {} replaced by {} (aliases: {})",
            plan.source,
            plan.destination,
            aliases.join(", ")
        );
        Ok(aliases)
    }

    async fn copy_search_relevancy(&self, plan: &Plan, config: &ReindexConfig) -> Result<()> {
        let doc = match &config.search_relevancy_settings {
            Some(doc) => Some(doc.clone()),
            None => {
                self.engine
                    .get_doc(&self.search_relevancy_index, &plan.source)
                    .await?
            }
        };
        if let Some(doc) = doc {
            self.engine
                .index_doc(
                    &self.search_relevancy_index,
                    Some(&plan.destination),
                    &doc,
                    false,
                )
                .await?;
        }
        Ok(())
    }

    /// Point synonym sets that name the source at the destination. Clones
    /// keep the source entry as well.
    async fn rewrite_synonyms(&self, plan: &Plan) -> Result<()> {
        let keep = plan.operation == ReindexOperation::ReindexWithClone;
        let body = json!({
            "query": { "term": { "index": plan.source } },
            "script": {
                "lang": "painless",
                "source": "if (ctx._source.index instanceof List) { \
                    if (!params.keep) { ctx._source.index.removeIf(i -> i == params.source); } \
                    if (!ctx._source.index.contains(params.destination)) { ctx._source.index.add(params.destination); } \
                } else { ctx._source.index = params.keep ? [params.source, params.destination] : [params.destination]; }",
                "params": {
                    "source": plan.source,
                    "destination": plan.destination,
                    "keep": keep,
                }
            }
        });
        match self.engine.update_by_query(&self.synonyms_index, &body).await {
            Ok(_) | Err(GatewayError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn discard_destination(&self, plan: &Plan) {
        if let Err(e) = self.engine.delete_index(&plan.destination).await {
            tracing::error!(
                "[reindex] failed to remove {} after failure: {}",
                plan.destination,
                e
            );
        }
    }

    fn completed(&self, plan: Plan, aliases: Vec<String>) -> ReindexOutcome {
        ReindexOutcome::Completed {
            source: plan.source,
            destination: plan.destination,
            operation: plan.operation,
            aliases,
        }
    }

    /// Poll an asynchronous copy until the engine reports it finished.
    async fn watch(self, ticket: TaskTicket, config: ReindexConfig) {
        let mut plan = Plan::from_ticket(&ticket);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let status = match self.engine.task(&ticket.task_id).await {
                Ok(body) => task_status(&body),
                Err(GatewayError::NotFound(_)) => {
                    TaskStatus::Failed(format!("task {} no longer exists", ticket.task_id))
                }
                Err(e) => {
                    tracing::warn!(
                        "[reindex] polling task {} failed: {}",
                        ticket.task_id,
                        e
                    );
                    continue;
                }
            };
            match status {
                TaskStatus::Running => continue,
                TaskStatus::Succeeded => {
                    plan.advance(ReindexState::Completed);
                    self.tasks.set_state(&ticket.task_id, ReindexState::Completed);
                    if let Err(e) = self.finalize(&mut plan, &config).await {
                        tracing::error!(
                            "[reindex] finalizing task {} failed: {}",
                            ticket.task_id,
                            e
                        );
                    }
                }
                TaskStatus::Failed(reason) => {
                    tracing::error!("[reindex] task {} failed: {}", ticket.task_id, reason);
                    plan.advance(ReindexState::Failed);
                    self.tasks.set_state(&ticket.task_id, ReindexState::Failed);
                    self.discard_destination(&plan).await;
                }
            }
            break;
        }

        self.tasks.remove(&ticket.task_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_status() {
        assert_eq!(task_status(&json!({"completed": false})), TaskStatus::Running);
        assert_eq!(
            task_status(&json!({"completed": true, "response": {"failures": []}})),
            TaskStatus::Succeeded
        );
        assert_eq!(
            task_status(&json!({"completed": true, "error": {"reason": "boom"}})),
            TaskStatus::Failed("boom".into())
        );
        let failed = task_status(&json!({
            "completed": true,
            "response": {"failures": [{"cause": {"reason": "mapper_parsing_exception"}}]}
        }));
        assert_eq!(
            failed,
            TaskStatus::Failed("1 documents failed to reindex: mapper_parsing_exception".into())
        );
    }

    #[test]
    fn test_reindex_body() {
        let plain = reindex_body("twitter", "twitter_reindexed_1", &ReindexConfig::default());
        assert_eq!(
            plain,
            json!({"source": {"index": "twitter"}, "dest": {"index": "twitter_reindexed_1"}})
        );

        let config = ReindexConfig {
            include: vec!["title".into()],
            script: Some("ctx._source.x = 1".into()),
            ..Default::default()
        };
        let body = reindex_body("a", "b", &config);
        assert_eq!(body["source"]["_source"]["includes"], json!(["title"]));
        assert_eq!(body["source"]["_source"]["excludes"], json!([]));
        assert_eq!(body["script"]["source"], "ctx._source.x = 1");
    }
}
