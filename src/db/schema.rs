use serde::{Deserialize, Serialize};
use surrealdb::{RecordId, sql::Datetime};

/// Persisted tenant ("Admin") record (table: `admin`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminRecord {
    /// Stable database identifier.
    pub id: RecordId,
    /// Application code registered with the identity provider.
    pub app_code: String,
    /// Application name, also the `%app_name%` of cache keys.
    pub app_name: String,
    /// Site identifier at the identity provider.
    pub site_id: String,
    /// Public API key. Unique.
    pub api_key: String,
    /// Signing secret. Unique, never logged.
    pub api_secret: String,
    pub description: Option<String>,
    /// Soft-delete marker. Deleted tenants never authenticate.
    pub deleted_at: Option<Datetime>,
    pub created_at: Option<Datetime>,
}

/// Payload for provisioning a new tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminCreate {
    pub app_code: String,
    pub app_name: String,
    pub site_id: String,
    pub api_key: String,
    pub api_secret: String,
    pub description: Option<String>,
}

/// Role classification of a user within one tenant (table: `member`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: RecordId,
    /// Tenant record id rendered as a string (e.g. `admin:abc`).
    pub admin_id: String,
    /// User id issued by the identity provider.
    pub user_id: i64,
    /// Configured integer value of the role (see `RoleValues`).
    pub role_value: i64,
    pub created_at: Option<Datetime>,
}
