use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexAction {
    Mappings,
    Settings,
    Data,
    SearchRelevancy,
    Synonyms,
}

/// Body of `POST /_reindex/{index}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReindexConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_relevancy_settings: Option<Value>,
    /// Legacy document types; accepted and ignored by typeless engines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(default, alias = "include_fields", skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, alias = "exclude_fields", skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub action: Vec<ReindexAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl ReindexConfig {
    /// An empty action set means every action.
    pub fn wants(&self, action: ReindexAction) -> bool {
        self.action.is_empty() || self.action.contains(&action)
    }

    /// Only `data` was requested: the destination is not created up front.
    pub fn data_only(&self) -> bool {
        !self.action.is_empty() && self.action.iter().all(|a| *a == ReindexAction::Data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexOperation {
    /// Auto-named destination; the source is deleted and its aliases move.
    ReindexWithDelete,
    /// Caller-named destination; the source is kept.
    ReindexWithClone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexState {
    Initial,
    Prepared,
    Reindexing,
    Completed,
    Failed,
    Finalized,
}

impl ReindexState {
    pub fn can_advance_to(self, next: ReindexState) -> bool {
        use ReindexState::*;
        matches!(
            (self, next),
            (Initial, Prepared)
                | (Initial, Failed)
                | (Prepared, Reindexing)
                | (Prepared, Completed)
                | (Prepared, Failed)
                | (Reindexing, Completed)
                | (Reindexing, Failed)
                | (Completed, Finalized)
                | (Completed, Failed)
                | (Failed, Finalized)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ReindexState::Finalized
    }
}

/// An in-flight asynchronous reindex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTicket {
    #[serde(rename = "taskId")]
    pub task_id: String,
    pub tenant: String,
    pub source: String,
    pub destination: String,
    pub operation: ReindexOperation,
    /// `number_of_replicas` of the source, restored after the copy.
    pub replicas: Value,
    pub state: ReindexState,
}

/// What the client is told once the orchestrator returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ReindexOutcome {
    Completed {
        source: String,
        destination: String,
        operation: ReindexOperation,
        aliases: Vec<String>,
    },
    Accepted(TaskTicket),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_set() {
        let all = ReindexConfig::default();
        assert!(all.wants(ReindexAction::Data));
        assert!(!all.data_only());

        let cfg: ReindexConfig =
            serde_json::from_value(json!({"action": ["data"], "include_fields": ["title"]})).unwrap();
        assert!(cfg.data_only());
        assert!(!cfg.wants(ReindexAction::Mappings));
        assert_eq!(cfg.include, vec!["title"]);
    }

    #[test]
    fn test_state_transitions() {
        use ReindexState::*;
        assert!(Initial.can_advance_to(Prepared));
        assert!(Reindexing.can_advance_to(Failed));
        assert!(Completed.can_advance_to(Finalized));
        assert!(!Initial.can_advance_to(Completed));
        assert!(!Finalized.can_advance_to(Initial));
        assert!(!Failed.can_advance_to(Completed));
    }
}
