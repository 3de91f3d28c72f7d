// Database query helpers for the tenant and membership tables.

use crate::db::schema::*;
use anyhow::{Result, anyhow};
use surrealdb::RecordId;
use surrealdb::{Surreal, engine::any::Any};

pub struct QueryBuilder;

impl QueryBuilder {
    /// Provision a new tenant.
    pub async fn create_admin(db: &Surreal<Any>, data: &AdminCreate) -> Result<AdminRecord> {
        let mut res = db
            .query(
                r#"
                CREATE admin CONTENT {
                    app_code: $app_code,
                    app_name: $app_name,
                    site_id: $site_id,
                    api_key: $api_key,
                    api_secret: $api_secret,
                    description: $description
                }
                "#,
            )
            .bind(("app_code", data.app_code.clone()))
            .bind(("app_name", data.app_name.clone()))
            .bind(("site_id", data.site_id.clone()))
            .bind(("api_key", data.api_key.clone()))
            .bind(("api_secret", data.api_secret.clone()))
            .bind(("description", data.description.clone()))
            .await?;

        let created: Vec<AdminRecord> = res.take(0)?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("failed to create admin record"))
    }

    /// Find the live (not soft-deleted) tenant owning `api_key`.
    pub async fn find_live_admin_by_api_key(
        db: &Surreal<Any>,
        api_key: &str,
    ) -> Result<Option<AdminRecord>> {
        let mut res = db
            .query(
                r#"
                SELECT * FROM admin
                WHERE api_key = $api_key
                  AND deleted_at IS NONE
                LIMIT 1
                "#,
            )
            .bind(("api_key", api_key.to_string()))
            .await?;

        let admins: Vec<AdminRecord> = res.take(0)?;
        Ok(admins.into_iter().next())
    }

    /// Mark a tenant deleted. Its api key stops resolving immediately in
    /// storage; cached lookups expire with their TTL.
    pub async fn soft_delete_admin(db: &Surreal<Any>, admin_id: &RecordId) -> Result<()> {
        db.query("UPDATE $id SET deleted_at = time::now()")
            .bind(("id", admin_id.clone()))
            .await?
            .check()?;
        Ok(())
    }

    /// Set the role value of a user within a tenant, replacing any previous one.
    pub async fn upsert_member_role(
        db: &Surreal<Any>,
        admin_id: &str,
        user_id: i64,
        role_value: i64,
    ) -> Result<MemberRecord> {
        let mut res = db
            .query(
                r#"
                DELETE member WHERE admin_id = $admin_id AND user_id = $user_id;
                CREATE member CONTENT {
                    admin_id: $admin_id,
                    user_id: $user_id,
                    role_value: $role_value
                };
                "#,
            )
            .bind(("admin_id", admin_id.to_string()))
            .bind(("user_id", user_id))
            .bind(("role_value", role_value))
            .await?;

        let created: Vec<MemberRecord> = res.take(1)?;
        created
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("failed to create member record"))
    }

    /// Role value of a user within a tenant, if the user has one.
    pub async fn find_member_role(
        db: &Surreal<Any>,
        admin_id: &str,
        user_id: i64,
    ) -> Result<Option<i64>> {
        let mut res = db
            .query(
                r#"
                SELECT * FROM member
                WHERE admin_id = $admin_id
                  AND user_id = $user_id
                LIMIT 1
                "#,
            )
            .bind(("admin_id", admin_id.to_string()))
            .bind(("user_id", user_id))
            .await?;

        let members: Vec<MemberRecord> = res.take(0)?;
        Ok(members.into_iter().next().map(|m| m.role_value))
    }
}
