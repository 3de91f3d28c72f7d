//! Request signature verification.
//!
//! Clients sign every request with their tenant's API secret:
//!
//! ```text
//! signature = hex(HMAC-SHA256(api_secret, canonical_string))
//! ```
//!
//! where the v1 canonical string is these fields joined by `\n`:
//!
//! 1. uppercase HTTP method
//! 2. path exactly as requested, without the query (`/1/posters`)
//! 3. timestamp header value, verbatim (Unix seconds)
//! 4. api key header value
//! 5. query pairs sorted by key then value, joined as `k=v&k=v` (raw, not
//!    re-encoded; a bare `k` becomes `k=`); empty when there is no query
//! 6. lowercase hex SHA-256 of the raw body (of empty input when bodiless)
//!
//! Canonicalization sits behind [`Canonicalizer`] so a later format can be
//! introduced next to v1.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::auth::{AuthError, Tenant};
use crate::cache::{CacheKeys, CacheStore, sha256_hex};
use crate::types::ApiSecret;

type HmacSha256 = Hmac<Sha256>;

/// The parts of a request covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub timestamp: &'a str,
    pub api_key: &'a str,
    pub body: &'a [u8],
}

/// Builds the string that gets signed.
pub trait Canonicalizer: Send + Sync {
    /// Version tag, for logs.
    fn version(&self) -> &'static str;

    fn canonicalize(&self, request: &SignedRequest<'_>) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CanonicalV1;

impl CanonicalV1 {
    fn canonical_query(query: Option<&str>) -> String {
        let Some(query) = query else {
            return String::new();
        };

        let mut pairs: Vec<(&str, &str)> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .collect();
        pairs.sort();

        pairs
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }
}

impl Canonicalizer for CanonicalV1 {
    fn version(&self) -> &'static str {
        "v1"
    }

    fn canonicalize(&self, request: &SignedRequest<'_>) -> String {
        [
            request.method.to_ascii_uppercase(),
            request.path.to_string(),
            request.timestamp.to_string(),
            request.api_key.to_string(),
            Self::canonical_query(request.query),
            sha256_hex(request.body),
        ]
        .join("\n")
    }
}

/// Digest used for signatures. Only SHA-256 is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
}

impl DigestAlgorithm {
    pub fn from_name(name: &str) -> Option<Self> {
        name.eq_ignore_ascii_case("sha256").then_some(Self::Sha256)
    }

    /// Name used in the verified-headers cache key.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }
}

fn hmac_sha256(secret: &[u8], message: &str) -> anyhow::Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Failed to initialize HMAC: {}", e))?;
    mac.update(message.as_bytes());
    Ok(mac)
}

/// Lowercase hex HMAC-SHA256 of `message`.
pub fn hmac_sha256_hex(secret: &[u8], message: &str) -> anyhow::Result<String> {
    Ok(hex::encode(hmac_sha256(secret, message)?.finalize().into_bytes()))
}

/// Client-side signing with the same canonical string the validator uses.
pub fn sign_request(
    secret: &ApiSecret,
    canonicalizer: &dyn Canonicalizer,
    request: &SignedRequest<'_>,
) -> anyhow::Result<String> {
    hmac_sha256_hex(secret.expose(), &canonicalizer.canonicalize(request))
}

/// `|now - timestamp| <= window`; a zero window accepts anything.
pub fn check_freshness(timestamp: &str, now: i64, window_secs: u64) -> Result<(), AuthError> {
    if window_secs == 0 {
        return Ok(());
    }

    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| AuthError::ExpiredTimestamp)?;

    if now.abs_diff(ts) > window_secs {
        return Err(AuthError::ExpiredTimestamp);
    }

    Ok(())
}

/// Stateless signature and freshness checker.
pub struct SignatureValidator {
    canonicalizer: Arc<dyn Canonicalizer>,
    algorithm: DigestAlgorithm,
    window_secs: u64,
    cache: Arc<dyn CacheStore>,
    keys: Arc<CacheKeys>,
    verified_ttl: Duration,
}

impl SignatureValidator {
    pub fn new(
        canonicalizer: Arc<dyn Canonicalizer>,
        algorithm: DigestAlgorithm,
        window_secs: u64,
        cache: Arc<dyn CacheStore>,
        keys: Arc<CacheKeys>,
        verified_ttl: Duration,
    ) -> Self {
        Self {
            canonicalizer,
            algorithm,
            window_secs,
            cache,
            keys,
            verified_ttl,
        }
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Verify `supplied` against `request` for `tenant`, then check freshness
    /// against the current clock.
    pub async fn verify(
        &self,
        tenant: &Tenant,
        request: &SignedRequest<'_>,
        supplied: &str,
    ) -> Result<(), AuthError> {
        self.verify_at(tenant, request, supplied, chrono::Utc::now().timestamp())
            .await
    }

    /// [`Self::verify`] with an explicit `now` (Unix seconds).
    pub async fn verify_at(
        &self,
        tenant: &Tenant,
        request: &SignedRequest<'_>,
        supplied: &str,
        now: i64,
    ) -> Result<(), AuthError> {
        let canonical = self.canonicalizer.canonicalize(request);
        let cache_key =
            self.keys
                .verified_headers(tenant, self.algorithm.name(), &canonical, supplied);

        let cached = self.cache.has(&cache_key).await.unwrap_or(false);
        if cached {
            debug!(tenant_id = %tenant.id, "signature verdict served from cache");
        } else {
            self.verify_mac(tenant, &canonical, supplied)?;
            if let Err(e) = self
                .cache
                .set(&cache_key, serde_json::Value::Bool(true), self.verified_ttl())
                .await
            {
                debug!(error = %e, "could not cache signature verdict");
            }
        }

        check_freshness(request.timestamp, now, self.window_secs)
    }

    fn verify_mac(&self, tenant: &Tenant, canonical: &str, supplied: &str) -> Result<(), AuthError> {
        let supplied = hex::decode(supplied.trim()).map_err(|_| AuthError::InvalidSignature)?;

        let mac = match self.algorithm {
            DigestAlgorithm::Sha256 => hmac_sha256(tenant.api_secret.expose(), canonical),
        }
        .map_err(|_| AuthError::InvalidSignature)?;

        // Constant-time comparison.
        mac.verify_slice(&supplied).map_err(|_| {
            debug!(
                tenant_id = %tenant.id,
                canonical_version = self.canonicalizer.version(),
                "signature mismatch"
            );
            AuthError::InvalidSignature
        })
    }

    fn verified_ttl(&self) -> Duration {
        if self.window_secs == 0 {
            self.verified_ttl
        } else {
            self.verified_ttl.min(Duration::from_secs(self.window_secs))
        }
    }
}
