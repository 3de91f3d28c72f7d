//! Request-scoped identity produced by the gate.

use std::sync::Arc;

use serde::Serialize;

use crate::auth::{Role, Tenant};
use crate::types::TenantId;

/// Who made the request: the tenant, and the end user if one logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedIdentity {
    pub tenant_id: TenantId,
    /// Absent on the guest path (no session headers).
    pub user_id: Option<i64>,
}

/// Outcome of a successful gate run, attached to the request for downstream
/// handlers. Immutable once created.
#[derive(Debug, Clone)]
pub struct AuthContext {
    tenant: Arc<Tenant>,
    user_id: Option<i64>,
    role: Role,
}

impl AuthContext {
    pub fn new(tenant: Arc<Tenant>, user_id: Option<i64>, role: Role) -> Self {
        Self {
            tenant,
            user_id,
            role,
        }
    }

    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant.id
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the request carried no session at all.
    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn identity(&self) -> AuthenticatedIdentity {
        AuthenticatedIdentity {
            tenant_id: self.tenant.id.clone(),
            user_id: self.user_id,
        }
    }
}
