use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use super::types::{ReindexState, TaskTicket};

#[derive(Default)]
struct Inner {
    tasks: HashMap<String, TaskTicket>,
    /// `(tenant, source)` pairs with a reindex being set up.
    claims: HashSet<(String, String)>,
}

/// In-process map of running asynchronous reindex tasks, keyed by task id.
#[derive(Default)]
pub struct TaskRegistry {
    inner: RwLock<Inner>,
}

/// Exclusive right to start a reindex of one source. Released on drop.
pub struct SourceClaim {
    registry: Arc<TaskRegistry>,
    key: (String, String),
}

impl SourceClaim {
    /// Register the running task and release the claim in one step.
    pub fn register(self, ticket: TaskTicket) -> TaskTicket {
        let mut inner = self.registry.write();
        inner.claims.remove(&self.key);
        let kept = inner
            .tasks
            .entry(ticket.task_id.clone())
            .or_insert(ticket)
            .clone();
        kept
    }
}

impl Drop for SourceClaim {
    fn drop(&mut self) {
        self.registry.write().claims.remove(&self.key);
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Check for a running task and claim the source under one lock.
    /// `Err(Some(ticket))` is the task already copying the source;
    /// `Err(None)` means another request is setting one up.
    pub fn claim(
        self: &Arc<Self>,
        tenant: &str,
        source: &str,
    ) -> Result<SourceClaim, Option<TaskTicket>> {
        let mut inner = self.write();
        if let Some(running) = inner
            .tasks
            .values()
            .find(|t| t.tenant == tenant && t.source == source)
        {
            return Err(Some(running.clone()));
        }
        let key = (tenant.to_string(), source.to_string());
        if !inner.claims.insert(key.clone()) {
            return Err(None);
        }
        Ok(SourceClaim {
            registry: Arc::clone(self),
            key,
        })
    }

    pub fn get(&self, task_id: &str) -> Option<TaskTicket> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .tasks
            .get(task_id)
            .cloned()
    }

    /// Move a ticket to `state`; illegal transitions are ignored and logged.
    pub fn set_state(&self, task_id: &str, state: ReindexState) -> bool {
        let mut inner = self.write();
        let Some(ticket) = inner.tasks.get_mut(task_id) else {
            return false;
        };
        if !ticket.state.can_advance_to(state) {
            tracing::warn!(
                task_id,
                from = ?ticket.state,
                to = ?state,
                "[reindex] ignoring illegal state transition"
            );
            return false;
        }
        ticket.state = state;
        true
    }

    pub fn remove(&self, task_id: &str) -> Option<TaskTicket> {
        self.write().tasks.remove(task_id)
    }

    pub fn list(&self) -> Vec<TaskTicket> {
        let mut all: Vec<_> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .tasks
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .tasks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
