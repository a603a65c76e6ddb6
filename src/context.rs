//! Per-request context carrier.
//!
//! A [`RequestContext`] is a small typed slot-bag. Every slot is addressed by
//! a key type implementing [`ContextKey`], which fixes the value shape for
//! that slot. The bag is created once per inbound request (by the request-id
//! middleware), cloned cheaply into every later middleware and handler, and
//! dropped when the response is flushed.
//!
//! Slots can be set and replaced but never cleared.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::identity::Identity;
use crate::types::{Acl, Category, CredentialKind, Operation};

/// A named slot with a single value shape.
pub trait ContextKey: 'static {
    type Value: Clone + Send + Sync + 'static;
    const NAME: &'static str;
}

macro_rules! context_key {
    ($(#[$meta:meta])* $key:ident: $value:ty = $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $key;

        impl ContextKey for $key {
            type Value = $value;
            const NAME: &'static str = $name;
        }
    };
}

context_key!(RequestIdKey: String = "request_id");
context_key!(IdentityKey: Arc<Identity> = "identity");
context_key!(CredentialKindKey: CredentialKind = "credential");
context_key!(OperationKey: Operation = "operation");
context_key!(CategoryKey: Category = "category");
context_key!(AclKey: Acl = "acl");
context_key!(
    /// Indices the request touches; empty means cluster-level.
    IndicesKey: Vec<String> = "indices"
);
context_key!(TenantKey: String = "tenant");
context_key!(RequestBodyKey: Bytes = "request_body");
context_key!(
    /// Body actually sent upstream, after functions and translation.
    ForwardedBodyKey: Bytes = "forwarded_body"
);
context_key!(
    /// Engine response body before the gateway rewrote it.
    ResponseBodyKey: Bytes = "response_body"
);
context_key!(StartTimeKey: DateTime<Utc> = "start_time");
context_key!(
    /// Remote address the request came from, after `X-Forwarded-For`.
    RemoteIpKey: std::net::IpAddr = "remote_ip"
);

struct Slot {
    name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

#[derive(Clone, Default)]
pub struct RequestContext {
    slots: Arc<RwLock<HashMap<TypeId, Slot>>>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("keys", &self.keys())
            .finish()
    }
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the value of slot `K`.
    pub fn set<K: ContextKey>(&self, value: K::Value) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.insert(
            TypeId::of::<K>(),
            Slot {
                name: K::NAME,
                value: Box::new(value),
            },
        );
    }

    pub fn get<K: ContextKey>(&self) -> Option<K::Value> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots
            .get(&TypeId::of::<K>())
            .and_then(|slot| slot.value.downcast_ref::<K::Value>())
            .cloned()
    }

    pub fn contains<K: ContextKey>(&self) -> bool {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        slots.contains_key(&TypeId::of::<K>())
    }

    /// Names of the slots currently set, sorted.
    pub fn keys(&self) -> Vec<&'static str> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<&'static str> = slots.values().map(|s| s.name).collect();
        names.sort_unstable();
        names
    }

    pub fn request_id(&self) -> String {
        self.get::<RequestIdKey>().unwrap_or_default()
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.get::<IdentityKey>()
    }

    pub fn category(&self) -> Option<Category> {
        self.get::<CategoryKey>()
    }

    pub fn indices(&self) -> Vec<String> {
        self.get::<IndicesKey>().unwrap_or_default()
    }

    pub fn tenant(&self) -> String {
        self.get::<TenantKey>()
            .unwrap_or_else(|| crate::alias_cache::DEFAULT_TENANT.to_string())
    }
}

#[cfg(feature = "axum-support")]
#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestContext {
    type Rejection = crate::error::GatewayError;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<RequestContext>().cloned().ok_or_else(|| {
            crate::error::GatewayError::Internal("request context missing".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_replace() {
        let ctx = RequestContext::new();
        assert!(ctx.get::<CategoryKey>().is_none());

        ctx.set::<CategoryKey>(Category::Search);
        assert_eq!(ctx.get::<CategoryKey>(), Some(Category::Search));

        ctx.set::<CategoryKey>(Category::Doc);
        assert_eq!(ctx.get::<CategoryKey>(), Some(Category::Doc));
    }

    #[test]
    fn test_clones_share_slots() {
        let ctx = RequestContext::new();
        let other = ctx.clone();
        other.set::<IndicesKey>(vec!["books".to_string()]);
        assert_eq!(ctx.indices(), vec!["books".to_string()]);
        assert_eq!(ctx.keys(), vec!["indices"]);
    }
}
