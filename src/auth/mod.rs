//! Request authentication for the multi-tenant social API.
//!
//! Every request is authenticated by [`AuthenticationGate`]:
//!
//! - **Signing headers**: api key, timestamp and HMAC signature identify
//!   the tenant and prove the request came from a holder of its secret
//! - **Session headers**: optional auth id and session handle identify an
//!   end user through the external identity provider
//! - **Role**: derived from the end user's membership in the tenant, or
//!   `NonRegisteredUser` when no session headers were sent
//!
//! ## Security Model
//!
//! - Every failure is fail-closed; collaborator errors never grant access
//! - Tenant lookup failures are indistinguishable from bad signatures
//! - Cached state is keyed per tenant, so nothing crosses tenant boundaries
//! - API secrets never appear in logs (see [`crate::types::ApiSecret`])
//!
//! ## Usage
//!
//! ```ignore
//! let gate = AuthenticationGate::from_config(&config, cache, tenants, sessions, membership)?;
//! let ctx = gate.authenticate(&request).await?;
//! permissions.check(ctx.role(), "1/posts", "POST")?;
//! ```

mod context;
mod error;
mod gate;
mod role;
mod session;
mod signature;
mod tenant;


pub use context::{AuthContext, AuthenticatedIdentity};
pub use error::{
    AuthError, CODE_EXPIRED_TIMESTAMP, CODE_FORBIDDEN, CODE_INTERNAL, CODE_INVALID_SIGNATURE,
    CODE_MISSING_HEADERS, CODE_SESSION_INVALID,
};
pub use gate::{AuthenticationGate, GateDenial, GateRequest, GateState};
pub use role::{MembershipLookup, Role, RoleMapping, RoleResolver, SurrealMembershipLookup};
pub use session::{
    HttpSessionLookup, SessionAccount, SessionAuthenticator, SessionLookup, SessionLookupRequest,
};
pub use signature::{
    CanonicalV1, Canonicalizer, DigestAlgorithm, SignatureValidator, SignedRequest,
    check_freshness, hmac_sha256_hex, sign_request,
};
pub use tenant::{SurrealTenantStore, Tenant, TenantDirectory, TenantStore, generate_credentials};
