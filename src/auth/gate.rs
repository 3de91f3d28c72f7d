//! Per-request authentication as an explicit state machine.
//!
//! ```text
//! Start -> HeadersChecked -> TenantResolved -> SignatureVerified
//!       -> (SessionResolved | GuestAssigned) -> RoleAssigned -> Done
//! ```
//!
//! Any transition may fail; the first failure ends the run with a
//! [`GateDenial`] naming the last state reached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use http::HeaderMap;
use tracing::{debug, error, warn};

use crate::auth::{
    AuthContext, AuthError, CanonicalV1, DigestAlgorithm, MembershipLookup, Role, RoleMapping,
    RoleResolver, SessionAuthenticator, SessionLookup, SignatureValidator, SignedRequest, Tenant,
    TenantDirectory, TenantStore,
};
use crate::cache::{CacheKeys, CacheStore};
use crate::config::{GateConfig, HeaderNames};
use crate::types::{ApiKey, AuthId, SessionId};

/// The parts of an HTTP request the gate reads.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub method: &'a str,
    /// Path without the query string.
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub headers: &'a HeaderMap,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Start,
    HeadersChecked,
    TenantResolved,
    SignatureVerified,
    SessionResolved,
    GuestAssigned,
    RoleAssigned,
    Done,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::HeadersChecked => "headers_checked",
            Self::TenantResolved => "tenant_resolved",
            Self::SignatureVerified => "signature_verified",
            Self::SessionResolved => "session_resolved",
            Self::GuestAssigned => "guest_assigned",
            Self::RoleAssigned => "role_assigned",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// A failed gate run: the error and the state the run was in when it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDenial {
    pub state: GateState,
    pub error: AuthError,
}

impl fmt::Display for GateDenial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "denied at {}: {}", self.state, self.error)
    }
}

impl std::error::Error for GateDenial {}

#[derive(Debug, Clone, Copy)]
struct SigningHeaders<'a> {
    api_key: &'a str,
    timestamp: &'a str,
    signature: &'a str,
}

enum Step<'a> {
    Start,
    HeadersChecked(SigningHeaders<'a>),
    TenantResolved(SigningHeaders<'a>, Arc<Tenant>),
    SignatureVerified(Arc<Tenant>),
    SessionResolved(Arc<Tenant>, i64),
    GuestAssigned(Arc<Tenant>),
    RoleAssigned(Arc<Tenant>, Option<i64>, Role),
    Done(AuthContext),
}

impl Step<'_> {
    fn state(&self) -> GateState {
        match self {
            Step::Start => GateState::Start,
            Step::HeadersChecked(..) => GateState::HeadersChecked,
            Step::TenantResolved(..) => GateState::TenantResolved,
            Step::SignatureVerified(..) => GateState::SignatureVerified,
            Step::SessionResolved(..) => GateState::SessionResolved,
            Step::GuestAssigned(..) => GateState::GuestAssigned,
            Step::RoleAssigned(..) => GateState::RoleAssigned,
            Step::Done(..) => GateState::Done,
        }
    }
}

/// Non-empty UTF-8 header value, or `None`.
fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub struct AuthenticationGate {
    headers: HeaderNames,
    tenants: TenantDirectory,
    signatures: SignatureValidator,
    sessions: SessionAuthenticator,
    roles: RoleResolver,
}

impl AuthenticationGate {
    pub fn new(
        headers: HeaderNames,
        tenants: TenantDirectory,
        signatures: SignatureValidator,
        sessions: SessionAuthenticator,
        roles: RoleResolver,
    ) -> Self {
        Self {
            headers,
            tenants,
            signatures,
            sessions,
            roles,
        }
    }

    /// Wire a gate from config and its collaborators. Fails on invalid config.
    pub fn from_config(
        config: &GateConfig,
        cache: Arc<dyn CacheStore>,
        tenant_store: Arc<dyn TenantStore>,
        session_lookup: Arc<dyn SessionLookup>,
        membership: Arc<dyn MembershipLookup>,
    ) -> Result<Self> {
        config.validate()?;

        let keys = Arc::new(CacheKeys::from_templates(&config.cache_keys)?);
        let algorithm = DigestAlgorithm::from_name(&config.digest)
            .ok_or_else(|| anyhow!("Unsupported signature digest `{}`", config.digest))?;

        let tenants = TenantDirectory::new(
            tenant_store,
            cache.clone(),
            keys.clone(),
            Duration::from_secs(config.tenant_cache_ttl_secs),
        );
        let signatures = SignatureValidator::new(
            Arc::new(CanonicalV1),
            algorithm,
            config.authorization_expiration_window_secs,
            cache.clone(),
            keys.clone(),
            Duration::from_secs(config.verified_headers_ttl_secs),
        );
        let sessions = SessionAuthenticator::new(
            session_lookup,
            cache.clone(),
            keys.clone(),
            Duration::from_secs(config.session_cache_ttl_secs),
            config.headers.auth_id.clone(),
            config.headers.user_ssid.clone(),
        );
        let roles = RoleResolver::new(
            RoleMapping::from_values(&config.roles)?,
            membership,
            cache,
            keys,
            Duration::from_secs(config.role_cache_ttl_secs),
        );

        Ok(Self::new(config.headers.clone(), tenants, signatures, sessions, roles))
    }

    pub fn header_names(&self) -> &HeaderNames {
        &self.headers
    }

    /// Run the full state machine for one request.
    pub async fn authenticate(&self, request: &GateRequest<'_>) -> Result<AuthContext, GateDenial> {
        let mut step = Step::Start;

        loop {
            let state = step.state();
            step = match step {
                Step::Done(ctx) => {
                    debug!(
                        tenant_id = %ctx.tenant_id(),
                        user_id = ?ctx.user_id(),
                        role = %ctx.role(),
                        "request authenticated"
                    );
                    return Ok(ctx);
                }
                current => match self.advance(current, request).await {
                    Ok(next) => next,
                    Err(error) => return Err(self.deny(state, error, request)),
                },
            };
        }
    }

    async fn advance<'a>(
        &self,
        step: Step<'a>,
        request: &GateRequest<'a>,
    ) -> Result<Step<'a>, AuthError> {
        let next = match step {
            Step::Start => Step::HeadersChecked(self.check_headers(request.headers)?),

            Step::HeadersChecked(signing) => {
                let tenant = self.tenants.resolve(&ApiKey::new(signing.api_key)).await?;
                Step::TenantResolved(signing, Arc::new(tenant))
            }

            Step::TenantResolved(signing, tenant) => {
                let signed = SignedRequest {
                    method: request.method,
                    path: request.path,
                    query: request.query,
                    timestamp: signing.timestamp,
                    api_key: signing.api_key,
                    body: request.body,
                };
                self.signatures
                    .verify(&tenant, &signed, signing.signature)
                    .await?;
                Step::SignatureVerified(tenant)
            }

            Step::SignatureVerified(tenant) => {
                // Guest only when no session header is sent at all. Empty
                // values fall through to the session check and fail there.
                let sent = [
                    &self.headers.auth_id,
                    &self.headers.user_ssid,
                    &self.headers.session_id,
                ]
                .into_iter()
                .any(|name| request.headers.contains_key(name.as_str()));

                if !sent {
                    Step::GuestAssigned(tenant)
                } else {
                    let auth_id = header(request.headers, &self.headers.auth_id);
                    let session_id = header(request.headers, &self.headers.user_ssid)
                        .or_else(|| header(request.headers, &self.headers.session_id));
                    let user_id = self
                        .sessions
                        .authenticate(
                            &tenant,
                            auth_id.map(AuthId::new).as_ref(),
                            session_id.map(SessionId::new).as_ref(),
                        )
                        .await?;
                    Step::SessionResolved(tenant, user_id)
                }
            }

            Step::SessionResolved(tenant, user_id) => {
                let role = self.roles.resolve(&tenant, Some(user_id)).await?;
                Step::RoleAssigned(tenant, Some(user_id), role)
            }

            Step::GuestAssigned(tenant) => {
                let role = self.roles.resolve(&tenant, None).await?;
                Step::RoleAssigned(tenant, None, role)
            }

            Step::RoleAssigned(tenant, user_id, role) => {
                Step::Done(AuthContext::new(tenant, user_id, role))
            }

            Step::Done(ctx) => Step::Done(ctx),
        };

        Ok(next)
    }

    fn check_headers<'h>(&self, headers: &'h HeaderMap) -> Result<SigningHeaders<'h>, AuthError> {
        let api_key = header(headers, &self.headers.api_key);
        let timestamp = header(headers, &self.headers.timestamp);
        let signature = header(headers, &self.headers.signature);

        match (api_key, timestamp, signature) {
            (Some(api_key), Some(timestamp), Some(signature)) => Ok(SigningHeaders {
                api_key,
                timestamp,
                signature,
            }),
            _ => {
                let missing = [
                    (&self.headers.api_key, api_key),
                    (&self.headers.timestamp, timestamp),
                    (&self.headers.signature, signature),
                ]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| name.clone())
                .collect();
                Err(AuthError::MissingHeaders(missing))
            }
        }
    }

    fn deny(&self, state: GateState, error: AuthError, request: &GateRequest<'_>) -> GateDenial {
        if error.is_fatal() {
            error!(
                state = %state,
                kind = error.kind(),
                method = request.method,
                path = request.path,
                "gate aborted: {}",
                error
            );
        } else {
            warn!(
                state = %state,
                kind = error.kind(),
                method = request.method,
                path = request.path,
                "request denied: {}",
                error
            );
        }
        GateDenial { state, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::sign_request;
    use crate::auth::tests_support::{FakeMembership, FakeSessionLookup, FakeTenantStore, tenant};
    use crate::cache::MemoryCacheStore;
    use http::HeaderValue;

    struct Harness {
        gate: AuthenticationGate,
        sessions: Arc<FakeSessionLookup>,
        tenants: Arc<FakeTenantStore>,
    }

    fn harness(sessions: FakeSessionLookup, membership: FakeMembership) -> Harness {
        let tenants = Arc::new(FakeTenantStore::with(vec![tenant(
            "admin:t",
            "app",
            "k1",
            "s3cr3t",
        )]));
        let sessions = Arc::new(sessions);
        let gate = AuthenticationGate::from_config(
            &GateConfig::default(),
            Arc::new(MemoryCacheStore::new()),
            tenants.clone(),
            sessions.clone(),
            Arc::new(membership),
        )
        .unwrap();
        Harness {
            gate,
            sessions,
            tenants,
        }
    }

    fn signed_headers(method: &str, path: &str, body: &[u8], secret: &str) -> HeaderMap {
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign_request(
            &crate::types::ApiSecret::new(secret),
            &CanonicalV1,
            &SignedRequest {
                method,
                path,
                query: None,
                timestamp: &timestamp,
                api_key: "k1",
                body,
            },
        )
        .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-social-api-key", HeaderValue::from_static("k1"));
        headers.insert("x-social-timestamp", HeaderValue::from_str(&timestamp).unwrap());
        headers.insert("x-social-signature", HeaderValue::from_str(&signature).unwrap());
        headers
    }

    fn request<'a>(path: &'a str, headers: &'a HeaderMap) -> GateRequest<'a> {
        GateRequest {
            method: "GET",
            path,
            query: None,
            headers,
            body: b"",
        }
    }

    #[tokio::test]
    async fn test_guest_path() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");

        let ctx = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap();
        assert_eq!(ctx.role(), Role::NonRegisteredUser);
        assert_eq!(ctx.user_id(), None);
        assert_eq!(ctx.tenant_id().as_str(), "admin:t");
        assert_eq!(h.sessions.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_signing_headers() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let mut headers = HeaderMap::new();
        headers.insert("x-social-api-key", HeaderValue::from_static("k1"));

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.state, GateState::Start);
        assert_eq!(
            denial.error,
            AuthError::MissingHeaders(vec![
                "x-social-timestamp".to_string(),
                "x-social-signature".to_string()
            ])
        );
        assert_eq!(h.tenants.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_api_key() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let mut headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");
        headers.insert("x-social-api-key", HeaderValue::from_static("k2"));

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.state, GateState::HeadersChecked);
        assert_eq!(denial.error, AuthError::TenantNotFound);
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let headers = signed_headers("GET", "/1/posters", b"", "not-the-secret");

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.state, GateState::TenantResolved);
        assert_eq!(denial.error, AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn test_signature_bound_to_path() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");

        let denial = h.gate.authenticate(&request("/1/posts", &headers)).await.unwrap_err();
        assert_eq!(denial.error, AuthError::InvalidSignature);
    }

    #[tokio::test]
    async fn test_stale_timestamp() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let timestamp = (chrono::Utc::now().timestamp() - 3600).to_string();
        let signature = sign_request(
            &crate::types::ApiSecret::new("s3cr3t"),
            &CanonicalV1,
            &SignedRequest {
                method: "GET",
                path: "/1/posters",
                query: None,
                timestamp: &timestamp,
                api_key: "k1",
                body: b"",
            },
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-social-api-key", HeaderValue::from_static("k1"));
        headers.insert("x-social-timestamp", HeaderValue::from_str(&timestamp).unwrap());
        headers.insert("x-social-signature", HeaderValue::from_str(&signature).unwrap());

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.error, AuthError::ExpiredTimestamp);
    }

    #[tokio::test]
    async fn test_session_path_resolves_member_role() {
        let h = harness(
            FakeSessionLookup::returning(Some(7)),
            FakeMembership::with(vec![(7, 3)]),
        );
        let mut headers = signed_headers("GET", "/1/likes", b"", "s3cr3t");
        headers.insert("x-social-auth-id", HeaderValue::from_static("auth"));
        headers.insert("x-social-user-ssid", HeaderValue::from_static("sess"));

        let ctx = h.gate.authenticate(&request("/1/likes", &headers)).await.unwrap();
        assert_eq!(ctx.user_id(), Some(7));
        assert_eq!(ctx.role(), Role::PaidMember);
        assert_eq!(h.sessions.calls(), 1);
    }

    #[tokio::test]
    async fn test_session_id_header_is_fallback() {
        let h = harness(FakeSessionLookup::returning(Some(7)), FakeMembership::with(vec![]));
        let mut headers = signed_headers("GET", "/1/likes", b"", "s3cr3t");
        headers.insert("x-social-auth-id", HeaderValue::from_static("auth"));
        headers.insert("x-social-session-id", HeaderValue::from_static("sess"));

        let ctx = h.gate.authenticate(&request("/1/likes", &headers)).await.unwrap();
        assert_eq!(ctx.role(), Role::FreeMember);
        assert_eq!(h.sessions.last_request().unwrap().session_id, "sess");
    }

    #[tokio::test]
    async fn test_partial_session_headers() {
        let h = harness(FakeSessionLookup::returning(Some(7)), FakeMembership::with(vec![]));
        let mut headers = signed_headers("GET", "/1/likes", b"", "s3cr3t");
        headers.insert("x-social-auth-id", HeaderValue::from_static("auth"));

        let denial = h.gate.authenticate(&request("/1/likes", &headers)).await.unwrap_err();
        assert_eq!(denial.state, GateState::SignatureVerified);
        assert_eq!(
            denial.error,
            AuthError::MissingHeaders(vec!["x-social-user-ssid".to_string()])
        );
        assert_eq!(h.sessions.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_session_headers_are_not_a_guest() {
        let h = harness(FakeSessionLookup::returning(Some(7)), FakeMembership::with(vec![]));
        let mut headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");
        headers.insert("x-social-auth-id", HeaderValue::from_static(""));
        headers.insert("x-social-user-ssid", HeaderValue::from_static(""));

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.state, GateState::SignatureVerified);
        assert_eq!(
            denial.error,
            AuthError::MissingHeaders(vec![
                "x-social-auth-id".to_string(),
                "x-social-user-ssid".to_string(),
            ])
        );
        assert_eq!(h.sessions.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_session_header_alone_is_not_a_guest() {
        let h = harness(FakeSessionLookup::returning(Some(7)), FakeMembership::with(vec![]));
        let mut headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");
        headers.insert("x-social-session-id", HeaderValue::from_static("  "));

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert!(matches!(denial.error, AuthError::MissingHeaders(_)));
    }

    #[tokio::test]
    async fn test_invalid_session_never_downgrades_to_guest() {
        let h = harness(FakeSessionLookup::empty_account(), FakeMembership::with(vec![]));
        let mut headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");
        headers.insert("x-social-auth-id", HeaderValue::from_static("auth"));
        headers.insert("x-social-user-ssid", HeaderValue::from_static("sess"));

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.error, AuthError::SessionInvalid);
    }

    #[tokio::test]
    async fn test_unknown_role_is_fatal() {
        let h = harness(
            FakeSessionLookup::returning(Some(7)),
            FakeMembership::with(vec![(7, 99)]),
        );
        let mut headers = signed_headers("GET", "/1/posters", b"", "s3cr3t");
        headers.insert("x-social-auth-id", HeaderValue::from_static("auth"));
        headers.insert("x-social-user-ssid", HeaderValue::from_static("sess"));

        let denial = h.gate.authenticate(&request("/1/posters", &headers)).await.unwrap_err();
        assert_eq!(denial.state, GateState::SessionResolved);
        assert!(denial.error.is_fatal());
    }

    #[tokio::test]
    async fn test_signed_body_and_query() {
        let h = harness(FakeSessionLookup::returning(Some(1)), FakeMembership::with(vec![]));
        let body = br#"{"title":"hello"}"#;
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = sign_request(
            &crate::types::ApiSecret::new("s3cr3t"),
            &CanonicalV1,
            &SignedRequest {
                method: "POST",
                path: "/1/posts",
                query: Some("page=2&limit=10"),
                timestamp: &timestamp,
                api_key: "k1",
                body,
            },
        )
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-social-api-key", HeaderValue::from_static("k1"));
        headers.insert("x-social-timestamp", HeaderValue::from_str(&timestamp).unwrap());
        headers.insert("x-social-signature", HeaderValue::from_str(&signature).unwrap());

        // Query order does not matter; body bytes do.
        let ok = GateRequest {
            method: "POST",
            path: "/1/posts",
            query: Some("limit=10&page=2"),
            headers: &headers,
            body,
        };
        assert!(h.gate.authenticate(&ok).await.is_ok());

        let tampered = GateRequest {
            body: br#"{"title":"HELLO"}"#,
            ..ok
        };
        assert_eq!(
            h.gate.authenticate(&tampered).await.unwrap_err().error,
            AuthError::InvalidSignature
        );
    }

    #[test]
    fn test_from_config_rejects_bad_config() {
        let config = GateConfig {
            digest: "md5".to_string(),
            ..Default::default()
        };
        let result = AuthenticationGate::from_config(
            &config,
            Arc::new(MemoryCacheStore::new()),
            Arc::new(FakeTenantStore::with(vec![])),
            Arc::new(FakeSessionLookup::returning(None)),
            Arc::new(FakeMembership::with(vec![])),
        );
        assert!(result.is_err());
    }
}
