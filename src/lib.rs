// Core modules
pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod permission;
pub mod types;

// Re-export key types and functions
pub use api::{AppState, create_router, create_router_with, protected};
pub use auth::{AuthContext, AuthError, AuthenticationGate, Role, Tenant};
pub use config::GateConfig;
pub use db::{DatabaseConfig, create_connection, ensure_schema};
pub use permission::PermissionMatrix;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use auth::{HttpSessionLookup, SurrealMembershipLookup, SurrealTenantStore};
use cache::{CacheInvalidator, CacheKeys, CacheStore, MemoryCacheStore};

/// Convenience function to wire a fully configured gate.
///
/// Tenants and memberships come from `db`, sessions from the configured
/// identity provider, and all derived state lives in one in-process cache.
pub async fn create_app_state(config: &GateConfig, db: db::Db) -> Result<AppState> {
    config.validate()?;

    let store = MemoryCacheStore::new();
    store.spawn_sweeper(Duration::from_secs(config.cache_sweep_interval_secs));
    let cache: Arc<dyn CacheStore> = Arc::new(store);
    let keys = Arc::new(CacheKeys::from_templates(&config.cache_keys)?);

    let gate = AuthenticationGate::from_config(
        config,
        cache.clone(),
        Arc::new(SurrealTenantStore::new(db.clone())),
        Arc::new(HttpSessionLookup::new(&config.identity_provider)?),
        Arc::new(SurrealMembershipLookup::new(db)),
    )?;

    info!(
        window_secs = config.authorization_expiration_window_secs,
        digest = %config.digest,
        "authentication gate ready"
    );

    Ok(AppState::new(
        Arc::new(gate),
        Arc::new(PermissionMatrix::standard()),
        CacheInvalidator::new(cache, keys),
    ))
}
