//! Role to endpoint permission table.
//!
//! Each role's grants are listed explicitly; no role inherits from another.
//! A common set applies to every role, and a role-specific entry for the same
//! endpoint replaces the common one.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;

use crate::auth::{AuthError, Role};
use crate::types::EndpointKey;

/// Methods allowed on one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionEntry {
    pub endpoint_key: EndpointKey,
    pub allowed_methods: BTreeSet<String>,
}

impl PermissionEntry {
    pub fn new(endpoint_key: &str, methods: &[&str]) -> Self {
        Self {
            endpoint_key: EndpointKey::new(endpoint_key),
            allowed_methods: methods.iter().map(|m| m.to_string()).collect(),
        }
    }
}

const ALL: &[&str] = &["GET", "POST", "PUT", "DELETE"];

fn common_entries() -> Vec<PermissionEntry> {
    vec![
        PermissionEntry::new("1/posters", &["GET"]),
        PermissionEntry::new("1/posts-social", &["GET"]),
        PermissionEntry::new("1/comments", &["GET"]),
        PermissionEntry::new("1/likes", &["GET"]),
        PermissionEntry::new("1/media", &["GET"]),
        PermissionEntry::new("1/auth/context", &["GET"]),
    ]
}

fn role_entries(role: Role) -> Vec<PermissionEntry> {
    match role {
        Role::NonRegisteredUser => vec![],
        Role::Administrator => vec![
            PermissionEntry::new("1/posters", ALL),
            PermissionEntry::new("1/posts", ALL),
            PermissionEntry::new("1/comments", &["GET", "DELETE"]),
            PermissionEntry::new("1/media", &["GET", "POST", "DELETE"]),
            PermissionEntry::new("1/ng-words", ALL),
            PermissionEntry::new("1/throttle-configs", ALL),
            PermissionEntry::new("1/cache/members", &["DELETE"]),
            PermissionEntry::new("1/cache/ng-words", &["DELETE"]),
        ],
        Role::Poster => vec![
            PermissionEntry::new("1/posters", &["GET", "PUT"]),
            PermissionEntry::new("1/posts", &["GET", "POST", "PUT"]),
            PermissionEntry::new("1/comments", &["GET", "POST", "DELETE"]),
            PermissionEntry::new("1/media", &["GET", "POST"]),
        ],
        Role::PaidMember => vec![
            PermissionEntry::new("1/posts", &["GET"]),
            PermissionEntry::new("1/comments", ALL),
            PermissionEntry::new("1/likes", &["GET", "POST", "DELETE"]),
        ],
        Role::FreeMember => vec![
            PermissionEntry::new("1/posts", &["GET"]),
            PermissionEntry::new("1/comments", &["GET", "POST"]),
            PermissionEntry::new("1/likes", &["GET", "POST", "DELETE"]),
        ],
    }
}

/// Merged, read-only permission table.
#[derive(Debug, Clone)]
pub struct PermissionMatrix {
    merged: HashMap<Role, HashMap<EndpointKey, BTreeSet<String>>>,
}

impl PermissionMatrix {
    /// Merge `common` into every role, then overlay each role's own entries.
    pub fn new(common: Vec<PermissionEntry>, per_role: HashMap<Role, Vec<PermissionEntry>>) -> Self {
        let mut merged = HashMap::new();

        for role in Role::ALL {
            let mut table: HashMap<EndpointKey, BTreeSet<String>> = common
                .iter()
                .map(|e| (e.endpoint_key.clone(), e.allowed_methods.clone()))
                .collect();

            for entry in per_role.get(&role).into_iter().flatten() {
                table.insert(entry.endpoint_key.clone(), entry.allowed_methods.clone());
            }

            merged.insert(role, table);
        }

        Self { merged }
    }

    /// The deployed table.
    pub fn standard() -> Self {
        let per_role = Role::ALL
            .into_iter()
            .map(|role| (role, role_entries(role)))
            .collect();
        Self::new(common_entries(), per_role)
    }

    /// Exact match on `(endpoint_key, method)`. No prefixes, no wildcards.
    pub fn is_allowed(&self, role: Role, endpoint_key: &str, method: &str) -> bool {
        self.merged
            .get(&role)
            .and_then(|table| table.get(endpoint_key))
            .is_some_and(|methods| methods.contains(method))
    }

    pub fn check(&self, role: Role, endpoint_key: &str, method: &str) -> Result<(), AuthError> {
        if self.is_allowed(role, endpoint_key, method) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }

    /// Sorted methods `role` may use on `endpoint_key`.
    pub fn allowed_methods(&self, role: Role, endpoint_key: &str) -> Vec<&str> {
        self.merged
            .get(&role)
            .and_then(|table| table.get(endpoint_key))
            .map(|methods| methods.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        Self::standard()
    }
}
