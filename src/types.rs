//! NewType wrappers for strong typing throughout the gate.
//!
//! These types keep the many header values and identifiers that flow through
//! authentication from being mixed up (e.g., passing an auth id where a
//! session handle is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Stable identifier of a tenant ("Admin") record, e.g. `admin:k3j2...`.
    ///
    /// Used to scope cache keys and membership lookups so that nothing
    /// cached for one tenant can be read on behalf of another.
    TenantId
);

newtype_string!(
    /// Public API key sent by clients in the api-key header.
    ///
    /// Unique across live tenants; resolves to at most one tenant.
    ApiKey
);

newtype_string!(
    /// Application code registered with the external identity provider.
    AppCode
);

newtype_string!(
    /// Human-readable application name. Also the `%app_name%` placeholder
    /// of every tenant-scoped cache key.
    AppName
);

newtype_string!(
    /// Site identifier of the tenant at the external identity provider.
    SiteId
);

newtype_string!(
    /// End-user auth id issued by the external identity provider.
    AuthId
);

newtype_string!(
    /// Session handle issued by the external identity provider at login.
    SessionId
);

newtype_string!(
    /// Endpoint identifier used by the permission matrix (e.g. `1/posts`).
    EndpointKey
);

/// Shared secret used to sign requests for one tenant.
///
/// Formatting never reveals the value, so a secret cannot leak through
/// `{:?}` in a log line or a panic message.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiSecret(String);

impl ApiSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw secret bytes, for keying the HMAC.
    pub fn expose(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Raw secret as a string. Only for handing the value to the tenant
    /// once at provisioning time.
    pub fn expose_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiSecret(***)")
    }
}

impl fmt::Display for ApiSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
