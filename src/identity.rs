use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::GatewayConfig;
use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};
use crate::types::{Acl, Category, CredentialKind, Operation};

/// Access grants common to users and permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grants {
    #[serde(default)]
    pub acls: Vec<Acl>,
    /// `None` allows every category reachable through the granted acls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<Category>>,
    #[serde(default = "all_operations")]
    pub ops: Vec<Operation>,
    /// Ordered index glob patterns; `*` grants cluster-wide access.
    #[serde(default)]
    pub indices: Vec<String>,
    /// Allowed source networks in CIDR notation.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Allowed `Referer` patterns (regular expressions).
    #[serde(default)]
    pub referers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_fields: Vec<String>,
    #[serde(default)]
    pub exclude_fields: Vec<String>,
    /// Requests per hour per remote IP; 0 disables the limit.
    #[serde(default)]
    pub ip_limit: u64,
    /// Requests per second per credential; 0 disables the limit.
    #[serde(default)]
    pub acl_limit: u64,
}

fn all_operations() -> Vec<Operation> {
    Operation::ALL.to_vec()
}

impl Grants {
    pub fn unrestricted() -> Self {
        Self {
            acls: Acl::ALL.to_vec(),
            categories: None,
            ops: all_operations(),
            indices: vec!["*".to_string()],
            sources: vec![],
            referers: vec![],
            expires_at: None,
            include_fields: vec![],
            exclude_fields: vec![],
            ip_limit: 0,
            acl_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "id")]
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub grants: Grants,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    #[serde(alias = "id")]
    pub username: String,
    pub password: String,
    /// Id of the user that created this permission.
    #[serde(alias = "owner")]
    pub creator: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Lifetime in seconds; 0 or negative means no expiry.
    #[serde(default)]
    pub ttl: i64,
    #[serde(flatten)]
    pub grants: Grants,
}

/// The authenticated principal of a request.
#[derive(Debug, Clone)]
pub enum Identity {
    User(User),
    Permission(Permission),
}

impl Identity {
    /// Decode a stored credential document. Documents carrying a `creator`
    /// (or legacy `owner`) field are permissions; everything else is a user.
    pub fn from_document(doc: serde_json::Value) -> Result<Self> {
        let is_permission = doc
            .as_object()
            .map(|o| o.contains_key("creator") || o.contains_key("owner"))
            .unwrap_or(false);
        if is_permission {
            let permission: Permission = serde_json::from_value(doc)
                .map_err(|e| GatewayError::Internal(format!("malformed permission: {}", e)))?;
            Ok(Identity::Permission(permission))
        } else {
            let user: User = serde_json::from_value(doc)
                .map_err(|e| GatewayError::Internal(format!("malformed user: {}", e)))?;
            Ok(Identity::User(user))
        }
    }

    /// Admin user built from the master credentials in the environment.
    pub fn master(username: &str, password: &str) -> Self {
        Identity::User(User {
            username: username.to_string(),
            password: password.to_string(),
            is_admin: true,
            email: None,
            grants: Grants::unrestricted(),
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Identity::User(u) => &u.username,
            Identity::Permission(p) => &p.username,
        }
    }

    pub fn password(&self) -> &str {
        match self {
            Identity::User(u) => &u.password,
            Identity::Permission(p) => &p.password,
        }
    }

    pub fn grants(&self) -> &Grants {
        match self {
            Identity::User(u) => &u.grants,
            Identity::Permission(p) => &p.grants,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self {
            Identity::User(_) => CredentialKind::User,
            Identity::Permission(_) => CredentialKind::Permission,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Identity::User(u) if u.is_admin)
    }

    pub fn has_cluster_access(&self) -> bool {
        self.grants().indices.iter().any(|i| i == "*")
    }

    /// Expiry from either the explicit `expires_at` or a permission's TTL.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl_expiry = match self {
            Identity::Permission(p) if p.ttl > 0 => Some(p.created_at + Duration::seconds(p.ttl)),
            _ => None,
        };
        match (self.grants().expires_at, ttl_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| now > at)
    }
}

static PASSWORD_MAC_KEY: Lazy<[u8; 32]> = Lazy::new(|| rand::thread_rng().gen());

/// Constant-time password comparison.
///
/// Both values are run through HMAC-SHA256 under a per-process key and the
/// digests compared with `verify_slice`, so timing is independent of where the
/// inputs first differ and of their lengths.
pub fn verify_password(expected: &str, provided: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;
    let Ok(mut expected_mac) = HmacSha256::new_from_slice(&*PASSWORD_MAC_KEY) else {
        return false;
    };
    expected_mac.update(expected.as_bytes());
    let expected_digest = expected_mac.finalize().into_bytes();

    let Ok(mut provided_mac) = HmacSha256::new_from_slice(&*PASSWORD_MAC_KEY) else {
        return false;
    };
    provided_mac.update(provided.as_bytes());
    provided_mac.verify_slice(&expected_digest).is_ok()
}

/// Lookup of stored credentials by username.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn lookup(&self, username: &str) -> Result<Option<Identity>>;
}

/// Credential documents live in the users and permissions indices, keyed by
/// username. The users index is consulted first. The kind of a document comes
/// from its fields, see [`Identity::from_document`].
pub struct EngineIdentityStore {
    engine: EngineClient,
    users_index: String,
    permissions_index: String,
}

impl EngineIdentityStore {
    pub fn new(engine: EngineClient, config: &GatewayConfig) -> Self {
        Self {
            engine,
            users_index: config.users_index.clone(),
            permissions_index: config.permissions_index.clone(),
        }
    }
}

#[async_trait]
impl IdentityStore for EngineIdentityStore {
    async fn lookup(&self, username: &str) -> Result<Option<Identity>> {
        for index in [&self.users_index, &self.permissions_index] {
            if let Some(doc) = self.engine.get_doc(index, username).await? {
                return Identity::from_document(doc).map(Some);
            }
        }
        Ok(None)
    }
}

/// Fixed credential set, used for tests and single-node deployments.
#[derive(Default)]
pub struct MemoryIdentityStore {
    identities: RwLock<HashMap<String, Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: Identity) {
        self.identities
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.id().to_string(), identity);
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn lookup(&self, username: &str) -> Result<Option<Identity>> {
        Ok(self
            .identities
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(username)
            .cloned())
    }
}
