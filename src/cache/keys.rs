//! Cache key templates.
//!
//! Templates are plain strings with `%name%` placeholders. Every key that
//! holds tenant or user data carries `%admin_id%`, so two tenants never
//! collide on a key even when they share an app name.

use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};

use crate::auth::Tenant;
use crate::config::CacheKeyTemplates;
use crate::types::{ApiKey, AuthId, SessionId};

const KNOWN_PLACEHOLDERS: &[&str] = &["app_name", "extension_key", "algorithm", "admin_id", "user_id"];

/// Lowercase hex SHA-256 of `input`.
pub fn sha256_hex(input: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input);
    format!("{:x}", hasher.finalize())
}

/// A validated key template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyTemplate {
    template: String,
    placeholders: Vec<String>,
}

impl CacheKeyTemplate {
    /// Parse `template`, rejecting unknown placeholders, unterminated `%`
    /// and templates missing any of `required`.
    pub fn parse(template: &str, required: &[&str]) -> Result<Self> {
        let mut placeholders = Vec::new();
        let mut rest = template;

        while let Some(start) = rest.find('%') {
            let after = &rest[start + 1..];
            let end = after
                .find('%')
                .ok_or_else(|| anyhow!("unterminated placeholder in `{}`", template))?;
            let name = &after[..end];
            if !KNOWN_PLACEHOLDERS.contains(&name) {
                return Err(anyhow!("unknown placeholder `%{}%` in `{}`", name, template));
            }
            placeholders.push(name.to_string());
            rest = &after[end + 1..];
        }

        for name in required {
            if !placeholders.iter().any(|p| p == name) {
                return Err(anyhow!("template `{}` must contain `%{}%`", template, name));
            }
        }

        Ok(Self {
            template: template.to_string(),
            placeholders,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute placeholders. Placeholders without a value stay verbatim.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut key = self.template.clone();
        for (name, value) in values {
            if self.placeholders.iter().any(|p| p == name) {
                key = key.replace(&format!("%{}%", name), value);
            }
        }
        key
    }
}

/// All key templates the gate and the invalidation surface use.
#[derive(Debug, Clone)]
pub struct CacheKeys {
    tenant: CacheKeyTemplate,
    verified_headers: CacheKeyTemplate,
    user_auth: CacheKeyTemplate,
    member_role: CacheKeyTemplate,
    member_data: CacheKeyTemplate,
    user_data: CacheKeyTemplate,
    ng_words: CacheKeyTemplate,
}

fn parse_named(name: &str, template: &str, required: &[&str]) -> Result<CacheKeyTemplate> {
    CacheKeyTemplate::parse(template, required).map_err(|e| anyhow!("cache_keys.{}: {}", name, e))
}

impl CacheKeys {
    pub fn from_templates(templates: &CacheKeyTemplates) -> Result<Self> {
        Ok(Self {
            tenant: parse_named("tenant", &templates.tenant, &["extension_key"])?,
            // The canonical string hashed into the extension carries the api key.
            verified_headers: parse_named(
                "verified_headers",
                &templates.verified_headers,
                &["app_name", "extension_key"],
            )?,
            user_auth: parse_named(
                "user_auth",
                &templates.user_auth,
                &["admin_id", "extension_key"],
            )?,
            member_role: parse_named("member_role", &templates.member_role, &["admin_id", "user_id"])?,
            member_data: parse_named("member_data", &templates.member_data, &["admin_id", "user_id"])?,
            user_data: parse_named("user_data", &templates.user_data, &["admin_id", "user_id"])?,
            ng_words: parse_named("ng_words", &templates.ng_words, &["admin_id"])?,
        })
    }

    /// Tenant lookup key. The raw api key never appears in the key.
    pub fn tenant(&self, api_key: &ApiKey) -> String {
        let extension = sha256_hex(api_key.as_str().as_bytes());
        self.tenant.render(&[("extension_key", &extension)])
    }

    /// Verified-signature key, bound to the exact canonical string and signature.
    pub fn verified_headers(
        &self,
        tenant: &Tenant,
        algorithm: &str,
        canonical: &str,
        signature: &str,
    ) -> String {
        let extension = sha256_hex(format!("{}\n{}", canonical, signature).as_bytes());
        self.verified_headers.render(&[
            ("app_name", tenant.app_name.as_str()),
            ("admin_id", tenant.id.as_str()),
            ("algorithm", algorithm),
            ("extension_key", &extension),
        ])
    }

    /// Session key. `auth_id` is length-prefixed so no pair of header values
    /// can hash the same as another.
    pub fn user_auth(&self, tenant: &Tenant, auth_id: &AuthId, session_id: &SessionId) -> String {
        let auth_id = auth_id.as_str();
        let extension =
            sha256_hex(format!("{}:{}:{}", auth_id.len(), auth_id, session_id).as_bytes());
        self.user_auth.render(&[
            ("app_name", tenant.app_name.as_str()),
            ("admin_id", tenant.id.as_str()),
            ("extension_key", &extension),
        ])
    }

    pub fn member_role(&self, tenant: &Tenant, user_id: i64) -> String {
        Self::render_user(&self.member_role, tenant, user_id)
    }

    pub fn member_data(&self, tenant: &Tenant, user_id: i64) -> String {
        Self::render_user(&self.member_data, tenant, user_id)
    }

    pub fn user_data(&self, tenant: &Tenant, user_id: i64) -> String {
        Self::render_user(&self.user_data, tenant, user_id)
    }

    pub fn ng_words(&self, tenant: &Tenant) -> String {
        self.ng_words.render(&[
            ("app_name", tenant.app_name.as_str()),
            ("admin_id", tenant.id.as_str()),
        ])
    }

    fn render_user(template: &CacheKeyTemplate, tenant: &Tenant, user_id: i64) -> String {
        let user_id = user_id.to_string();
        template.render(&[
            ("app_name", tenant.app_name.as_str()),
            ("admin_id", tenant.id.as_str()),
            ("user_id", &user_id),
        ])
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        // The default templates are known-good.
        Self::from_templates(&CacheKeyTemplates::default()).expect("default cache key templates")
    }
}
