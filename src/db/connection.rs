use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "social".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "gate".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

/// Define the tenant and membership tables. Safe to run repeatedly.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    let schema_queries = [
        // Tenants ("Admin" records). Provisioned out of band, read-only to the gate.
        "DEFINE TABLE IF NOT EXISTS admin SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS app_code ON TABLE admin TYPE string;
         DEFINE FIELD IF NOT EXISTS app_name ON TABLE admin TYPE string;
         DEFINE FIELD IF NOT EXISTS site_id ON TABLE admin TYPE string;
         DEFINE FIELD IF NOT EXISTS api_key ON TABLE admin TYPE string;
         DEFINE FIELD IF NOT EXISTS api_secret ON TABLE admin TYPE string;
         DEFINE FIELD IF NOT EXISTS description ON TABLE admin TYPE option<string>;
         DEFINE FIELD IF NOT EXISTS deleted_at ON TABLE admin TYPE option<datetime>;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE admin TYPE datetime DEFAULT time::now();",

        // Role classification of a user within a tenant.
        "DEFINE TABLE IF NOT EXISTS member SCHEMAFULL;
         DEFINE FIELD IF NOT EXISTS admin_id ON TABLE member TYPE string;
         DEFINE FIELD IF NOT EXISTS user_id ON TABLE member TYPE int;
         DEFINE FIELD IF NOT EXISTS role_value ON TABLE member TYPE int;
         DEFINE FIELD IF NOT EXISTS created_at ON TABLE member TYPE datetime DEFAULT time::now();",

        "DEFINE INDEX IF NOT EXISTS admin_api_key ON TABLE admin COLUMNS api_key UNIQUE;
         DEFINE INDEX IF NOT EXISTS admin_api_secret ON TABLE admin COLUMNS api_secret UNIQUE;
         DEFINE INDEX IF NOT EXISTS member_admin_user ON TABLE member COLUMNS admin_id, user_id UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?.check()?;
    }

    Ok(())
}
