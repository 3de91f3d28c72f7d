//! Tenant ("Admin") resolution from API keys.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::auth::AuthError;
use crate::cache::{CacheKeys, CacheStore, get_typed, set_typed};
use crate::db::{AdminRecord, Db, QueryBuilder};
use crate::types::{ApiKey, ApiSecret, AppCode, AppName, SiteId, TenantId};

/// An application account: the unit of multi-tenancy.
///
/// The gate only ever reads tenants; provisioning happens elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub app_code: AppCode,
    pub app_name: AppName,
    pub site_id: SiteId,
    pub api_key: ApiKey,
    pub api_secret: ApiSecret,
    pub description: Option<String>,
}

impl From<AdminRecord> for Tenant {
    fn from(record: AdminRecord) -> Self {
        Self {
            id: TenantId::new(record.id.to_string()),
            app_code: AppCode::new(record.app_code),
            app_name: AppName::new(record.app_name),
            site_id: SiteId::new(record.site_id),
            api_key: ApiKey::new(record.api_key),
            api_secret: ApiSecret::new(record.api_secret),
            description: record.description,
        }
    }
}

/// Fresh credentials for a new tenant: `sk_<8 hex>` and a 64-hex secret.
pub fn generate_credentials() -> (ApiKey, ApiSecret) {
    let key = uuid::Uuid::new_v4().simple().to_string();
    let secret = format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    );
    (ApiKey::new(format!("sk_{}", &key[..8])), ApiSecret::new(secret))
}

/// Backing store for tenants.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// The live (not soft-deleted) tenant owning `api_key`, if any.
    async fn find_by_api_key(&self, api_key: &ApiKey) -> Result<Option<Tenant>>;
}

/// SurrealDB-backed tenant store over the `admin` table.
pub struct SurrealTenantStore {
    db: Db,
}

impl SurrealTenantStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TenantStore for SurrealTenantStore {
    async fn find_by_api_key(&self, api_key: &ApiKey) -> Result<Option<Tenant>> {
        let record = QueryBuilder::find_live_admin_by_api_key(&self.db, api_key.as_str()).await?;
        Ok(record.map(Tenant::from))
    }
}

/// Cache-backed tenant lookup.
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    cache: Arc<dyn CacheStore>,
    keys: Arc<CacheKeys>,
    ttl: Duration,
}

impl TenantDirectory {
    pub fn new(
        store: Arc<dyn TenantStore>,
        cache: Arc<dyn CacheStore>,
        keys: Arc<CacheKeys>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            keys,
            ttl,
        }
    }

    /// Resolve the tenant for `api_key`.
    ///
    /// Misses are not cached. A store failure fails closed as
    /// [`AuthError::TenantNotFound`].
    pub async fn resolve(&self, api_key: &ApiKey) -> Result<Tenant, AuthError> {
        let key = self.keys.tenant(api_key);

        if let Some(tenant) = get_typed::<Tenant>(self.cache.as_ref(), &key).await {
            return Ok(tenant);
        }

        match self.store.find_by_api_key(api_key).await {
            Ok(Some(tenant)) => {
                debug!(tenant_id = %tenant.id, "tenant resolved from store");
                set_typed(self.cache.as_ref(), &key, &tenant, self.ttl).await;
                Ok(tenant)
            }
            Ok(None) => {
                warn!("api key does not match a live tenant");
                Err(AuthError::TenantNotFound)
            }
            Err(e) => {
                error!(error = %e, "tenant store lookup failed");
                Err(AuthError::TenantNotFound)
            }
        }
    }
}
