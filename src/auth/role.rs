//! Roles and role resolution.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::auth::{AuthError, Tenant};
use crate::cache::{CacheKeys, CacheStore, get_typed, set_typed};
use crate::config::RoleValues;
use crate::db::{Db, QueryBuilder};

/// Request authorization class. Computed per request, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    NonRegisteredUser,
    Administrator,
    Poster,
    PaidMember,
    FreeMember,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::NonRegisteredUser,
        Role::Administrator,
        Role::Poster,
        Role::PaidMember,
        Role::FreeMember,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::NonRegisteredUser => "non_registered_user",
            Role::Administrator => "administrator",
            Role::Poster => "poster",
            Role::PaidMember => "paid_member",
            Role::FreeMember => "free_member",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| anyhow!("unknown role `{}`", s))
    }
}

/// Bidirectional mapping between [`Role`] and the integers the membership
/// source stores. Built once at startup.
#[derive(Debug, Clone)]
pub struct RoleMapping {
    values: [(Role, i64); 5],
}

impl RoleMapping {
    /// Fails if two roles share a value.
    pub fn from_values(values: &RoleValues) -> Result<Self> {
        let values = [
            (Role::NonRegisteredUser, values.non_registered_user),
            (Role::Administrator, values.administrator),
            (Role::Poster, values.poster),
            (Role::PaidMember, values.paid_member),
            (Role::FreeMember, values.free_member),
        ];

        for (i, (role, value)) in values.iter().enumerate() {
            if let Some((other, _)) = values[..i].iter().find(|(_, v)| v == value) {
                return Err(anyhow!(
                    "duplicate role value {}: used by both {} and {}",
                    value,
                    other,
                    role
                ));
            }
        }

        Ok(Self { values })
    }

    pub fn value_of(&self, role: Role) -> i64 {
        self.values
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, v)| *v)
            .unwrap_or_default()
    }

    /// Map a stored value back to a role. Anything outside the mapping is a
    /// configuration fault.
    pub fn role_for(&self, value: i64) -> Result<Role, AuthError> {
        self.values
            .iter()
            .find(|(_, v)| *v == value)
            .map(|(r, _)| *r)
            .ok_or(AuthError::UnknownRole(value))
    }
}

impl Default for RoleMapping {
    fn default() -> Self {
        Self {
            values: [
                (Role::NonRegisteredUser, 0),
                (Role::Administrator, 1),
                (Role::Poster, 2),
                (Role::PaidMember, 3),
                (Role::FreeMember, 4),
            ],
        }
    }
}

/// Per-tenant membership classification.
#[async_trait]
pub trait MembershipLookup: Send + Sync {
    /// Stored role value of `user_id` in `tenant`, if the user has one.
    async fn role_value(&self, tenant: &Tenant, user_id: i64) -> Result<Option<i64>>;
}

/// Membership lookup over the `member` table.
pub struct SurrealMembershipLookup {
    db: Db,
}

impl SurrealMembershipLookup {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MembershipLookup for SurrealMembershipLookup {
    async fn role_value(&self, tenant: &Tenant, user_id: i64) -> Result<Option<i64>> {
        QueryBuilder::find_member_role(&self.db, tenant.id.as_str(), user_id).await
    }
}

pub struct RoleResolver {
    mapping: RoleMapping,
    membership: Arc<dyn MembershipLookup>,
    cache: Arc<dyn CacheStore>,
    keys: Arc<CacheKeys>,
    ttl: Duration,
}

impl RoleResolver {
    pub fn new(
        mapping: RoleMapping,
        membership: Arc<dyn MembershipLookup>,
        cache: Arc<dyn CacheStore>,
        keys: Arc<CacheKeys>,
        ttl: Duration,
    ) -> Self {
        Self {
            mapping,
            membership,
            cache,
            keys,
            ttl,
        }
    }

    pub fn mapping(&self) -> &RoleMapping {
        &self.mapping
    }

    /// Role for the request.
    ///
    /// No user means guest. A user without a membership record is a free
    /// member. A membership lookup failure denies the session.
    pub async fn resolve(&self, tenant: &Tenant, user_id: Option<i64>) -> Result<Role, AuthError> {
        let Some(user_id) = user_id else {
            return Ok(Role::NonRegisteredUser);
        };

        let key = self.keys.member_role(tenant, user_id);
        let value = match get_typed::<i64>(self.cache.as_ref(), &key).await {
            Some(value) => value,
            None => match self.membership.role_value(tenant, user_id).await {
                Ok(Some(value)) => {
                    set_typed(self.cache.as_ref(), &key, &value, self.ttl).await;
                    value
                }
                Ok(None) => {
                    debug!(tenant_id = %tenant.id, user_id, "no membership record");
                    return Ok(Role::FreeMember);
                }
                Err(e) => {
                    error!(tenant_id = %tenant.id, user_id, error = %e, "membership lookup failed");
                    return Err(AuthError::SessionInvalid);
                }
            },
        };

        self.mapping.role_for(value).inspect_err(|_| {
            error!(
                tenant_id = %tenant.id,
                user_id,
                role_value = value,
                "membership value outside configured roles"
            );
        })
    }
}
