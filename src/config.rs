//! Gate configuration.
//!
//! Everything has a default, so an empty JSON object is a complete config.
//! String values may reference environment variables as `${NAME}`.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

use crate::cache::CacheKeys;

/// Header names the gate reads. Compared case-insensitively by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNames {
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
    /// Fallback name for the session handle when `user_ssid` is absent.
    pub session_id: String,
    pub auth_id: String,
    pub user_ssid: String,
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            api_key: "x-social-api-key".to_string(),
            timestamp: "x-social-timestamp".to_string(),
            signature: "x-social-signature".to_string(),
            session_id: "x-social-session-id".to_string(),
            auth_id: "x-social-auth-id".to_string(),
            user_ssid: "x-social-user-ssid".to_string(),
        }
    }
}

/// Integer values the membership source uses for each role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleValues {
    pub non_registered_user: i64,
    pub administrator: i64,
    pub poster: i64,
    pub paid_member: i64,
    pub free_member: i64,
}

impl Default for RoleValues {
    fn default() -> Self {
        Self {
            non_registered_user: 0,
            administrator: 1,
            poster: 2,
            paid_member: 3,
            free_member: 4,
        }
    }
}

/// Cache key templates. See [`crate::cache::CacheKeyTemplate`] for the
/// placeholder syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheKeyTemplates {
    pub tenant: String,
    pub verified_headers: String,
    pub user_auth: String,
    pub member_role: String,
    pub member_data: String,
    pub user_data: String,
    pub ng_words: String,
}

impl Default for CacheKeyTemplates {
    fn default() -> Self {
        Self {
            tenant: "admin_%extension_key%".to_string(),
            verified_headers: "%app_name%_verified_headers_%algorithm%_%extension_key%".to_string(),
            user_auth: "%app_name%_%admin_id%_user_auth_%extension_key%".to_string(),
            member_role: "%app_name%_%admin_id%_member_role_%user_id%".to_string(),
            member_data: "%app_name%_%admin_id%_member_data_%user_id%".to_string(),
            user_data: "%app_name%_%admin_id%_user_data_%user_id%".to_string(),
            ng_words: "%app_name%_%admin_id%_ng_words".to_string(),
        }
    }
}

/// External identity provider used for session lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProviderConfig {
    /// Session lookup endpoint. Without it every session check fails closed.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub headers: HeaderNames,
    /// Allowed clock skew in seconds. `0` disables the freshness check.
    pub authorization_expiration_window_secs: u64,
    /// Digest used for request signatures. Only `sha256` is supported.
    pub digest: String,
    pub tenant_cache_ttl_secs: u64,
    pub session_cache_ttl_secs: u64,
    pub role_cache_ttl_secs: u64,
    pub verified_headers_ttl_secs: u64,
    /// How often expired cache entries are dropped.
    pub cache_sweep_interval_secs: u64,
    pub roles: RoleValues,
    pub cache_keys: CacheKeyTemplates,
    pub identity_provider: IdentityProviderConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            headers: HeaderNames::default(),
            authorization_expiration_window_secs: 300,
            digest: "sha256".to_string(),
            tenant_cache_ttl_secs: 600,
            session_cache_ttl_secs: 300,
            role_cache_ttl_secs: 300,
            verified_headers_ttl_secs: 300,
            cache_sweep_interval_secs: 60,
            roles: RoleValues::default(),
            cache_keys: CacheKeyTemplates::default(),
            identity_provider: IdentityProviderConfig::default(),
        }
    }
}

impl GateConfig {
    /// Parse a JSON config document, expanding `${VAR}` references first.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;
        expand_value(&mut value);
        let config: GateConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config from an explicit path, or from the default locations,
    /// or fall back to defaults when no file exists.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => Some(p),
            None => resolve_config_path(),
        };

        match path {
            Some(p) => {
                let raw = fs::read_to_string(&p)
                    .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", p.display(), e))?;
                Self::from_json_str(&raw)
            }
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Startup validation. Anything rejected here would otherwise surface as
    /// a fatal error on some later request.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.digest.eq_ignore_ascii_case("sha256") {
            return Err(anyhow::anyhow!(
                "Unsupported signature digest `{}` (only `sha256` is supported)",
                self.digest
            ));
        }

        crate::auth::RoleMapping::from_values(&self.roles)?;

        CacheKeys::from_templates(&self.cache_keys)?;

        if self.cache_sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("cache_sweep_interval_secs must be positive"));
        }

        Ok(())
    }
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("SOCIAL_GATE_CONFIG") {
        return Some(PathBuf::from(p));
    }

    let candidate = PathBuf::from("social-gate.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

fn expand_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = expand_env_vars(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(expand_value),
        serde_json::Value::Object(map) => map.values_mut().for_each(expand_value),
        _ => {}
    }
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}
