use std::collections::HashMap;
use std::sync::Mutex;

use crate::engine::EngineClient;
use crate::error::Result;

/// Tenant used when the gateway is not running multi-tenant.
pub const DEFAULT_TENANT: &str = "default";

#[derive(Default)]
struct Maps {
    /// tenant -> (index -> aliases)
    index_to_alias: HashMap<String, HashMap<String, Vec<String>>>,
    /// tenant -> (alias -> index)
    alias_to_index: HashMap<String, HashMap<String, String>>,
}

/// Process-wide bidirectional cache between aliases and concrete indices.
///
/// Both directions are mutated under the same lock, so after any call returns
/// they describe the same alias set.
#[derive(Default)]
pub struct IndexAliasCache {
    maps: Mutex<Maps>,
}

impl IndexAliasCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a tenant's view with the engine's current `_cat/aliases`.
    pub async fn refresh(&self, tenant: &str, engine: &EngineClient) -> Result<usize> {
        let pairs = engine.cat_aliases().await?;
        let count = pairs.len();
        self.replace_tenant(tenant, pairs);
        tracing::debug!("[alias-cache] loaded {} aliases for tenant {}", count, tenant);
        Ok(count)
    }

    pub fn replace_tenant(&self, tenant: &str, pairs: Vec<(String, String)>) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.index_to_alias.remove(tenant);
        maps.alias_to_index.remove(tenant);
        for (alias, index) in pairs {
            insert_locked(&mut maps, tenant, &alias, &index);
        }
    }

    pub fn set_alias(&self, tenant: &str, alias: &str, index: &str) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        insert_locked(&mut maps, tenant, alias, index);
    }

    /// Drop an index and every alias that pointed at it.
    pub fn remove_index(&self, tenant: &str, index: &str) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let aliases = maps
            .index_to_alias
            .get_mut(tenant)
            .and_then(|m| m.remove(index))
            .unwrap_or_default();
        if let Some(by_alias) = maps.alias_to_index.get_mut(tenant) {
            for alias in aliases {
                if by_alias.get(&alias).map(String::as_str) == Some(index) {
                    by_alias.remove(&alias);
                }
            }
        }
    }

    pub fn remove_alias(&self, tenant: &str, alias: &str) {
        let mut maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        let index = maps
            .alias_to_index
            .get_mut(tenant)
            .and_then(|m| m.remove(alias));
        if let Some(index) = index {
            if let Some(by_index) = maps.index_to_alias.get_mut(tenant) {
                if let Some(list) = by_index.get_mut(&index) {
                    list.retain(|a| a != alias);
                    if list.is_empty() {
                        by_index.remove(&index);
                    }
                }
            }
        }
    }

    pub fn index_for_alias(&self, tenant: &str, alias: &str) -> Option<String> {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.alias_to_index.get(tenant)?.get(alias).cloned()
    }

    pub fn aliases_for_index(&self, tenant: &str, index: &str) -> Vec<String> {
        let maps = self.maps.lock().unwrap_or_else(|e| e.into_inner());
        maps.index_to_alias
            .get(tenant)
            .and_then(|m| m.get(index))
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve a name that may be an alias to its concrete index.
    pub fn resolve(&self, tenant: &str, name: &str) -> String {
        self.index_for_alias(tenant, name)
            .unwrap_or_else(|| name.to_string())
    }
}

fn insert_locked(maps: &mut Maps, tenant: &str, alias: &str, index: &str) {
    let by_alias = maps.alias_to_index.entry(tenant.to_string()).or_default();
    if let Some(previous) = by_alias.insert(alias.to_string(), index.to_string()) {
        if previous != index {
            if let Some(list) = maps
                .index_to_alias
                .get_mut(tenant)
                .and_then(|m| m.get_mut(&previous))
            {
                list.retain(|a| a != alias);
            }
        }
    }
    let list = maps
        .index_to_alias
        .entry(tenant.to_string())
        .or_default()
        .entry(index.to_string())
        .or_default();
    if !list.iter().any(|a| a == alias) {
        list.push(alias.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions_agree() {
        let cache = IndexAliasCache::new();
        cache.set_alias("t1", "twitter", "twitter_reindexed_1");
        assert_eq!(
            cache.index_for_alias("t1", "twitter").as_deref(),
            Some("twitter_reindexed_1")
        );
        assert_eq!(cache.aliases_for_index("t1", "twitter_reindexed_1"), vec!["twitter"]);

        // moving the alias updates the reverse map
        cache.set_alias("t1", "twitter", "twitter_reindexed_2");
        assert!(cache.aliases_for_index("t1", "twitter_reindexed_1").is_empty());

        cache.remove_index("t1", "twitter_reindexed_2");
        assert!(cache.index_for_alias("t1", "twitter").is_none());
    }

    #[test]
    fn test_tenants_are_isolated() {
        let cache = IndexAliasCache::new();
        cache.set_alias("a", "books", "books_v1");
        assert!(cache.index_for_alias("b", "books").is_none());
        assert_eq!(cache.resolve("b", "books"), "books");
        assert_eq!(cache.resolve("a", "books"), "books_v1");
    }

    #[test]
    fn test_remove_alias() {
        let cache = IndexAliasCache::new();
        cache.replace_tenant(
            DEFAULT_TENANT,
            vec![
                ("a1".to_string(), "idx".to_string()),
                ("a2".to_string(), "idx".to_string()),
            ],
        );
        cache.remove_alias(DEFAULT_TENANT, "a1");
        assert_eq!(cache.aliases_for_index(DEFAULT_TENANT, "idx"), vec!["a2"]);
    }
}
