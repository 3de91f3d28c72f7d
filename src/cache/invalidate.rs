//! Explicit invalidation for administrative cache-clear endpoints.
//!
//! Deletions do not coordinate with in-flight reads; a request that already
//! fetched a value may still use it after the key is gone.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use super::{CacheKeys, CacheStore};
use crate::auth::Tenant;

#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn CacheStore>,
    keys: Arc<CacheKeys>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn CacheStore>, keys: Arc<CacheKeys>) -> Self {
        Self { cache, keys }
    }

    /// Clear cached member role, member data and user data for one user.
    pub async fn clear_member(&self, tenant: &Tenant, user_id: i64) -> Result<()> {
        for key in [
            self.keys.member_role(tenant, user_id),
            self.keys.member_data(tenant, user_id),
            self.keys.user_data(tenant, user_id),
        ] {
            self.cache.delete(&key).await?;
        }

        info!(tenant_id = %tenant.id, user_id, "cleared member cache");
        Ok(())
    }

    /// Clear the cached prohibited-word list of a tenant.
    pub async fn clear_ng_words(&self, tenant: &Tenant) -> Result<()> {
        self.cache.delete(&self.keys.ng_words(tenant)).await?;
        info!(tenant_id = %tenant.id, "cleared NG word cache");
        Ok(())
    }
}
