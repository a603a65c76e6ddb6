//! Closed enumerations shared by classification and authorization.
//!
//! All three serialise as lowercase strings. Older stored documents used
//! capitalised or upper-case spellings; those are accepted on read through
//! serde aliases and always written back in lowercase.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GatewayError;

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $variant:ident => $text:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text $(, alias = $alias)*)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = GatewayError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text $(| $alias)* => Ok($name::$variant), )+
                    other => Err(GatewayError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name).to_lowercase(),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum! {
    /// Coarse action families an identity can be granted.
    pub enum Acl {
        Docs => "docs" | "Docs" | "DOCS",
        Search => "search" | "Search" | "SEARCH",
        Indices => "indices" | "Indices" | "INDICES",
        Cat => "cat" | "Cat" | "CAT",
        Clusters => "clusters" | "Clusters" | "CLUSTERS",
        Misc => "misc" | "Misc" | "MISC",
        User => "user" | "User" | "USER",
        Permission => "permission" | "Permission" | "PERMISSION",
        Analytics => "analytics" | "Analytics" | "ANALYTICS",
        Streams => "streams" | "Streams" | "STREAMS",
        Rules => "rules" | "Rules" | "RULES",
        Functions => "functions" | "Functions" | "FUNCTIONS",
        Logs => "logs" | "Logs" | "LOGS",
    }
}

string_enum! {
    /// Request families, mirroring the engine API groups plus the gateway's own routes.
    pub enum Category {
        Bulk => "bulk",
        Cat => "cat",
        Cluster => "cluster",
        Search => "search",
        Msearch => "msearch",
        Count => "count",
        Doc => "doc",
        Source => "source",
        Get => "get",
        Mget => "mget",
        Update => "update",
        Explain => "explain",
        Validate => "validate",
        FieldCaps => "field_caps",
        TermVectors => "termvectors",
        SearchTemplate => "search_template",
        Indices => "indices",
        Alias => "alias" | "aliases",
        Mapping => "mapping" | "mappings",
        Settings => "settings",
        Analyze => "analyze",
        Refresh => "refresh",
        Flush => "flush",
        ForceMerge => "forcemerge",
        Stats => "stats",
        Template => "template",
        Scripts => "scripts",
        Ingest => "ingest",
        Nodes => "nodes",
        Snapshot => "snapshot",
        Tasks => "tasks",
        Reindex => "reindex",
        UpdateByQuery => "update_by_query",
        DeleteByQuery => "delete_by_query",
        ReactiveSearch => "reactivesearch",
        Logs => "logs",
        Analytics => "analytics",
        Rules => "rules",
        Functions => "functions",
        Misc => "misc",
    }
}

string_enum! {
    /// The single authoritative operation enumeration.
    pub enum Operation {
        Read => "read" | "Read" | "READ",
        Write => "write" | "Write" | "WRITE",
        Delete => "delete" | "Delete" | "DELETE",
    }
}

impl Category {
    /// Categories whose responses carry `hits.hits` and are eligible for query rules.
    pub fn is_search(&self) -> bool {
        matches!(
            self,
            Category::Search | Category::Msearch | Category::ReactiveSearch
        )
    }
}

impl Operation {
    pub fn from_method(method: &http::Method) -> Self {
        match *method {
            http::Method::GET | http::Method::HEAD | http::Method::OPTIONS => Operation::Read,
            http::Method::DELETE => Operation::Delete,
            _ => Operation::Write,
        }
    }
}

/// Which kind of credential authenticated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialKind {
    User,
    Permission,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_spellings_accepted() {
        let op: Operation = serde_json::from_str("\"READ\"").unwrap();
        assert_eq!(op, Operation::Read);
        assert_eq!(serde_json::to_string(&op).unwrap(), "\"read\"");

        let acl: Acl = serde_json::from_str("\"Docs\"").unwrap();
        assert_eq!(acl, Acl::Docs);
        assert_eq!(acl.to_string(), "docs");
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("mappings".parse::<Category>().unwrap(), Category::Mapping);
        assert_eq!("reactivesearch".parse::<Category>().unwrap(), Category::ReactiveSearch);
        assert!("nope".parse::<Category>().is_err());
    }

    #[test]
    fn test_operation_from_method() {
        assert_eq!(Operation::from_method(&http::Method::GET), Operation::Read);
        assert_eq!(Operation::from_method(&http::Method::PUT), Operation::Write);
        assert_eq!(Operation::from_method(&http::Method::DELETE), Operation::Delete);
    }
}
