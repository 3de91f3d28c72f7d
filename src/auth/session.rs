//! End-user session validation against the external identity provider.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::auth::{AuthError, Tenant};
use crate::cache::{CacheKeys, CacheStore, get_typed, set_typed};
use crate::config::IdentityProviderConfig;
use crate::types::{AuthId, SessionId};

/// Payload sent to the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLookupRequest {
    pub site_id: String,
    pub app_code: String,
    pub auth_id: String,
    pub session_id: String,
}

/// The part of the provider's account record the gate cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAccount {
    #[serde(default)]
    pub user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SessionLookupResponse {
    #[serde(default)]
    account: Option<SessionAccount>,
}

/// External session lookup.
///
/// `Ok(None)` means the provider does not know the session. Transport and
/// protocol failures are `Err`; callers treat both the same way.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    async fn lookup(&self, request: &SessionLookupRequest) -> Result<Option<SessionAccount>>;
}

/// Session lookup over HTTP: `POST <url>` with a JSON [`SessionLookupRequest`],
/// expecting `{"account": {"user_id": ...}}` back.
pub struct HttpSessionLookup {
    url: Option<String>,
    client: reqwest::Client,
}

impl HttpSessionLookup {
    pub fn new(config: &IdentityProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        if config.url.is_none() {
            warn!("identity_provider.url is not set; every session check will fail");
        }

        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl SessionLookup for HttpSessionLookup {
    async fn lookup(&self, request: &SessionLookupRequest) -> Result<Option<SessionAccount>> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("identity provider URL is not configured"))?;

        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| anyhow!("session lookup request failed: {}", e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(anyhow!(
                "HTTP {} from identity provider",
                response.status()
            ));
        }

        let body: SessionLookupResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("unparseable session lookup response: {}", e))?;

        Ok(body.account)
    }
}

/// Turns session headers into a user id, or a denial.
pub struct SessionAuthenticator {
    lookup: Arc<dyn SessionLookup>,
    cache: Arc<dyn CacheStore>,
    keys: Arc<CacheKeys>,
    ttl: Duration,
    auth_header: String,
    session_header: String,
}

impl SessionAuthenticator {
    /// `auth_header` and `session_header` are only used to name missing
    /// headers in the error.
    pub fn new(
        lookup: Arc<dyn SessionLookup>,
        cache: Arc<dyn CacheStore>,
        keys: Arc<CacheKeys>,
        ttl: Duration,
        auth_header: impl Into<String>,
        session_header: impl Into<String>,
    ) -> Self {
        Self {
            lookup,
            cache,
            keys,
            ttl,
            auth_header: auth_header.into(),
            session_header: session_header.into(),
        }
    }

    /// Validate the session and return the end user's id.
    ///
    /// Both headers must be present; that is checked before any external
    /// call. Only successful lookups are cached.
    pub async fn authenticate(
        &self,
        tenant: &Tenant,
        auth_id: Option<&AuthId>,
        session_id: Option<&SessionId>,
    ) -> Result<i64, AuthError> {
        let (auth_id, session_id) = match (auth_id, session_id) {
            (Some(a), Some(s)) => (a, s),
            (a, s) => {
                let mut missing = Vec::new();
                if a.is_none() {
                    missing.push(self.auth_header.clone());
                }
                if s.is_none() {
                    missing.push(self.session_header.clone());
                }
                return Err(AuthError::MissingHeaders(missing));
            }
        };

        let key = self.keys.user_auth(tenant, auth_id, session_id);
        if let Some(user_id) = get_typed::<i64>(self.cache.as_ref(), &key).await {
            return Ok(user_id);
        }

        let request = SessionLookupRequest {
            site_id: tenant.site_id.to_string(),
            app_code: tenant.app_code.to_string(),
            auth_id: auth_id.to_string(),
            session_id: session_id.to_string(),
        };

        let user_id = match self.lookup.lookup(&request).await {
            Ok(Some(SessionAccount { user_id: Some(id) })) => id,
            Ok(_) => {
                debug!(tenant_id = %tenant.id, "session lookup returned no user");
                return Err(AuthError::SessionInvalid);
            }
            Err(e) => {
                error!(tenant_id = %tenant.id, error = %e, "session lookup failed");
                return Err(AuthError::SessionInvalid);
            }
        };

        set_typed(self.cache.as_ref(), &key, &user_id, self.ttl).await;
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests_support::{FakeSessionLookup, tenant};
    use crate::cache::MemoryCacheStore;
    use axum::{Json, Router, routing::post};
    use serde_json::{Value, json};

    fn authenticator(lookup: Arc<dyn SessionLookup>) -> SessionAuthenticator {
        SessionAuthenticator::new(
            lookup,
            Arc::new(MemoryCacheStore::new()),
            Arc::new(CacheKeys::default()),
            Duration::from_secs(60),
            "x-social-auth-id",
            "x-social-user-ssid",
        )
    }

    #[tokio::test]
    async fn test_missing_headers_checked_before_lookup() {
        let lookup = Arc::new(FakeSessionLookup::returning(Some(7)));
        let auth = authenticator(lookup.clone());
        let t = tenant("admin:t", "app", "k1", "s");

        let err = auth
            .authenticate(&t, Some(&AuthId::new("a")), None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            AuthError::MissingHeaders(vec!["x-social-user-ssid".to_string()])
        );

        let err = auth.authenticate(&t, None, None).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingHeaders(names) if names.len() == 2));
        assert_eq!(lookup.calls(), 0);
    }

    #[tokio::test]
    async fn test_cached_session_not_shared_between_tenants_with_same_app_name() {
        let cache: Arc<dyn CacheStore> = Arc::new(MemoryCacheStore::new());
        let keys = Arc::new(CacheKeys::default());
        let for_lookup = |lookup: Arc<FakeSessionLookup>| {
            SessionAuthenticator::new(
                lookup,
                cache.clone(),
                keys.clone(),
                Duration::from_secs(60),
                "x-social-auth-id",
                "x-social-user-ssid",
            )
        };
        let a = tenant("admin:a", "Social", "ka", "sa");
        let b = tenant("admin:b", "Social", "kb", "sb");
        let (auth, sess) = (AuthId::new("auth"), SessionId::new("sess"));

        let lookup_a = Arc::new(FakeSessionLookup::returning(Some(7)));
        let auth_a = for_lookup(lookup_a.clone());
        assert_eq!(auth_a.authenticate(&a, Some(&auth), Some(&sess)).await.unwrap(), 7);

        let lookup_b = Arc::new(FakeSessionLookup::returning(None));
        let auth_b = for_lookup(lookup_b.clone());
        let err = auth_b
            .authenticate(&b, Some(&auth), Some(&sess))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::SessionInvalid);
        assert_eq!(lookup_b.calls(), 1);
    }

    #[tokio::test]
    async fn test_valid_session_is_cached() {
        let lookup = Arc::new(FakeSessionLookup::returning(Some(42)));
        let auth = authenticator(lookup.clone());
        let t = tenant("admin:t", "app", "k1", "s");
        let (a, s) = (AuthId::new("auth"), SessionId::new("sess"));

        assert_eq!(auth.authenticate(&t, Some(&a), Some(&s)).await.unwrap(), 42);
        assert_eq!(auth.authenticate(&t, Some(&a), Some(&s)).await.unwrap(), 42);
        assert_eq!(lookup.calls(), 1);

        let sent = lookup.last_request().unwrap();
        assert_eq!(sent.site_id, "site");
        assert_eq!(sent.app_code, "app-code");
        assert_eq!(sent.auth_id, "auth");
        assert_eq!(sent.session_id, "sess");
    }

    #[tokio::test]
    async fn test_empty_account_is_invalid_and_not_cached() {
        let lookup = Arc::new(FakeSessionLookup::empty_account());
        let auth = authenticator(lookup.clone());
        let t = tenant("admin:t", "app", "k1", "s");
        let (a, s) = (AuthId::new("auth"), SessionId::new("sess"));

        for _ in 0..2 {
            assert_eq!(
                auth.authenticate(&t, Some(&a), Some(&s)).await.unwrap_err(),
                AuthError::SessionInvalid
            );
        }
        assert_eq!(lookup.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_session_is_invalid() {
        let lookup = Arc::new(FakeSessionLookup::returning(None));
        let auth = authenticator(lookup);
        let t = tenant("admin:t", "app", "k1", "s");

        assert_eq!(
            auth.authenticate(&t, Some(&AuthId::new("a")), Some(&SessionId::new("s")))
                .await
                .unwrap_err(),
            AuthError::SessionInvalid
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_fails_closed() {
        let lookup = Arc::new(FakeSessionLookup::failing());
        let auth = authenticator(lookup);
        let t = tenant("admin:t", "app", "k1", "s");

        assert_eq!(
            auth.authenticate(&t, Some(&AuthId::new("a")), Some(&SessionId::new("s")))
                .await
                .unwrap_err(),
            AuthError::SessionInvalid
        );
    }

    #[tokio::test]
    async fn test_http_lookup_without_url_errors() {
        let lookup = HttpSessionLookup::new(&IdentityProviderConfig::default()).unwrap();
        let request = SessionLookupRequest {
            site_id: "site".into(),
            app_code: "code".into(),
            auth_id: "a".into(),
            session_id: "s".into(),
        };
        assert!(lookup.lookup(&request).await.is_err());
    }

    async fn spawn_provider() -> String {
        async fn session(Json(body): Json<SessionLookupRequest>) -> axum::response::Response {
            use axum::response::IntoResponse;
            match body.session_id.as_str() {
                "good" => Json(json!({ "account": { "user_id": 99 } })).into_response(),
                "no-user" => Json(json!({ "account": {} })).into_response(),
                "gone" => http::StatusCode::NOT_FOUND.into_response(),
                _ => (http::StatusCode::BAD_GATEWAY, Json(Value::Null)).into_response(),
            }
        }

        let app = Router::new().route("/session", post(session));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/session", addr)
    }

    #[tokio::test]
    async fn test_http_lookup_against_provider() {
        let url = spawn_provider().await;
        let lookup = HttpSessionLookup::new(&IdentityProviderConfig {
            url: Some(url),
            timeout_secs: 5,
        })
        .unwrap();

        let request = |session_id: &str| SessionLookupRequest {
            site_id: "site".into(),
            app_code: "code".into(),
            auth_id: "a".into(),
            session_id: session_id.into(),
        };

        assert_eq!(
            lookup.lookup(&request("good")).await.unwrap(),
            Some(SessionAccount { user_id: Some(99) })
        );
        assert_eq!(
            lookup.lookup(&request("no-user")).await.unwrap(),
            Some(SessionAccount { user_id: None })
        );
        assert_eq!(lookup.lookup(&request("gone")).await.unwrap(), None);
        assert!(lookup.lookup(&request("boom")).await.is_err());
    }
}
