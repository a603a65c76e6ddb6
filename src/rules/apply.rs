use std::collections::HashSet;

use serde_json::{json, Value};

use super::types::{Action, Rule};
use crate::engine::EngineClient;

/// A promoted document and the slot it should occupy in the hit list.
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    pub id: Option<String>,
    pub doc: Option<Value>,
    pub position: usize,
}

/// Accumulated effect of every rule that matched a search term.
#[derive(Debug, Default, Clone)]
pub struct RuleEffects {
    pub pins: Vec<Pin>,
    pub hidden: HashSet<String>,
    pub injected: Vec<Value>,
    pub applied_rules: Vec<String>,
}

impl RuleEffects {
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty() && self.hidden.is_empty() && self.injected.is_empty()
    }

    /// Fold rules in application order. A document pinned by an earlier rule
    /// is not pinned again; a hidden id is never promoted.
    pub fn from_rules(rules: &[Rule]) -> Self {
        let mut effects = RuleEffects::default();
        for rule in rules {
            if !rule.is_enabled() {
                continue;
            }
            for (action, payloads) in rule.then.actions() {
                for payload in payloads {
                    match action {
                        Action::Hide => {
                            if let Some(id) = &payload.doc_id {
                                effects.hidden.insert(id.clone());
                            }
                        }
                        Action::Promote => {
                            let duplicate = payload.doc_id.as_ref().is_some_and(|id| {
                                effects.pins.iter().any(|p| p.id.as_ref() == Some(id))
                            });
                            if !duplicate {
                                effects.pins.push(Pin {
                                    id: payload.doc_id.clone(),
                                    doc: payload.doc.clone(),
                                    position: payload.position.unwrap_or(0),
                                });
                            }
                        }
                        Action::Inject => {
                            let mut entry = serde_json::Map::new();
                            if let Some(id) = &payload.doc_id {
                                entry.insert("_id".into(), json!(id));
                            }
                            if let Some(doc) = &payload.doc {
                                entry.insert("_source".into(), doc.clone());
                            }
                            effects.injected.push(Value::Object(entry));
                        }
                    }
                }
            }
            effects.applied_rules.push(rule.id.clone());
        }
        effects
            .pins
            .retain(|p| p.id.as_ref().map_or(true, |id| !effects.hidden.contains(id)));
        effects
    }

    /// Load the `_source` of pins that only name a document id. Pins whose
    /// document cannot be fetched are kept only if the id shows up in hits.
    pub async fn fetch_pinned_docs(&mut self, engine: &EngineClient, index: &str) {
        for pin in self.pins.iter_mut().filter(|p| p.doc.is_none()) {
            let Some(id) = pin.id.clone() else { continue };
            match engine.get_doc(index, &id).await {
                Ok(doc) => pin.doc = doc,
                Err(e) => tracing::warn!("[rules] failed to fetch promoted doc {}: {}", id, e),
            }
        }
    }

    /// Rewrite a search, `_msearch` or ReactiveSearch response in place.
    /// Returns whether anything changed.
    pub fn apply(&self, body: &mut Value) -> bool {
        if self.is_empty() {
            return false;
        }
        if body.pointer("/hits/hits").is_some() {
            return self.apply_to_search(body);
        }
        let mut changed = false;
        if let Some(responses) = body.get_mut("responses").and_then(Value::as_array_mut) {
            for resp in responses {
                changed |= self.apply_to_search(resp);
            }
            return changed;
        }
        if let Some(obj) = body.as_object_mut() {
            for (key, resp) in obj.iter_mut() {
                if key == "settings" || key == "error" {
                    continue;
                }
                if resp.pointer("/hits/hits").is_some() {
                    changed |= self.apply_to_search(resp);
                }
            }
        }
        changed
    }

    fn apply_to_search(&self, resp: &mut Value) -> bool {
        let mut changed = false;
        let mut promoted = Vec::new();
        {
            let Some(hits) = resp.pointer_mut("/hits/hits").and_then(Value::as_array_mut) else {
                return false;
            };
            if !self.hidden.is_empty() {
                let before = hits.len();
                hits.retain(|h| {
                    h.get("_id")
                        .and_then(Value::as_str)
                        .map_or(true, |id| !self.hidden.contains(id))
                });
                changed |= hits.len() != before;
            }

            let mut pinned = Vec::new();
            for pin in &self.pins {
                let existing = pin.id.as_deref().and_then(|id| {
                    hits.iter()
                        .position(|h| h.get("_id").and_then(Value::as_str) == Some(id))
                });
                let hit = match (existing, &pin.doc) {
                    (Some(pos), _) => hits.remove(pos),
                    (None, Some(doc)) => {
                        let mut hit = json!({ "_source": doc });
                        if let Some(id) = &pin.id {
                            hit["_id"] = json!(id);
                        }
                        hit
                    }
                    (None, None) => continue,
                };
                pinned.push((pin.position, hit));
            }
            for (position, hit) in pinned {
                let at = position.min(hits.len());
                hits.insert(at, hit.clone());
                promoted.push(hit);
            }
        }

        let Some(obj) = resp.as_object_mut() else {
            return changed;
        };
        if !promoted.is_empty() {
            let entry = obj.entry("promoted").or_insert_with(|| json!([]));
            if let Some(list) = entry.as_array_mut() {
                list.extend(promoted);
            }
            changed = true;
        }
        if !self.injected.is_empty() {
            let entry = obj.entry("injected").or_insert_with(|| json!([]));
            if let Some(list) = entry.as_array_mut() {
                list.extend(self.injected.iter().cloned());
            }
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, then: Value) -> Rule {
        Rule::from_client(
            id,
            json!({"if": {"query": "harry", "operator": "contains"}, "then": then}),
        )
        .unwrap()
    }

    fn search(ids: &[&str]) -> Value {
        let hits: Vec<Value> = ids
            .iter()
            .map(|id| json!({"_id": id, "_source": {"title": id}}))
            .collect();
        json!({"took": 3, "hits": {"total": {"value": ids.len()}, "hits": hits}})
    }

    fn ids(resp: &Value) -> Vec<String> {
        resp["hits"]["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_hide_removes_hit() {
        let effects = RuleEffects::from_rules(&[rule(
            "r1",
            json!({"operation": "hide", "payloads": [{"docId": "42"}]}),
        )]);
        let mut resp = search(&["1", "42", "3"]);
        let upstream_len = resp.to_string().len();
        assert!(effects.apply(&mut resp));
        assert_eq!(ids(&resp), vec!["1", "3"]);
        assert!(resp.to_string().len() <= upstream_len);
        assert_eq!(effects.applied_rules, vec!["r1"]);
    }

    #[test]
    fn test_promote_moves_existing_and_inserts_new() {
        let effects = RuleEffects::from_rules(&[
            rule("a", json!({"promote": [{"docId": "3", "position": 0}]})),
            rule("b", json!({"promote": [{"docId": "ad", "doc": {"title": "ad"}, "position": 1}]})),
        ]);
        let mut resp = search(&["1", "2", "3"]);
        assert!(effects.apply(&mut resp));
        assert_eq!(ids(&resp), vec!["3", "ad", "1", "2"]);
        assert_eq!(resp["promoted"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_hidden_id_never_promoted() {
        let effects = RuleEffects::from_rules(&[
            rule("a", json!({"hide": [{"docId": "2"}]})),
            rule("b", json!({"promote": [{"docId": "2"}]})),
        ]);
        let mut resp = search(&["1", "2"]);
        effects.apply(&mut resp);
        assert_eq!(ids(&resp), vec!["1"]);
        assert!(resp.get("promoted").is_none());
    }

    #[test]
    fn test_inject_appends_entries() {
        let effects =
            RuleEffects::from_rules(&[rule("a", json!({"inject": [{"doc": {"banner": "sale"}}]}))]);
        let mut resp = search(&["1"]);
        assert!(effects.apply(&mut resp));
        assert_eq!(resp["injected"][0]["_source"]["banner"], "sale");
    }

    #[test]
    fn test_applies_to_msearch_and_reactivesearch() {
        let effects = RuleEffects::from_rules(&[rule("a", json!({"hide": [{"docId": "2"}]}))]);
        let mut msearch = json!({"responses": [search(&["1", "2"]), search(&["2"])]});
        assert!(effects.apply(&mut msearch));
        assert_eq!(ids(&msearch["responses"][0]), vec!["1"]);

        let mut rs = json!({"settings": {"took": 1}, "B": search(&["2", "5"])});
        assert!(effects.apply(&mut rs));
        assert_eq!(ids(&rs["B"]), vec!["5"]);
    }

    #[test]
    fn test_no_effects_leaves_body_untouched() {
        let effects = RuleEffects::default();
        let mut resp = search(&["1"]);
        let before = resp.clone();
        assert!(!effects.apply(&mut resp));
        assert_eq!(resp, before);
    }
}
