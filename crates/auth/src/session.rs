//! Per-request session context.

use chrono::{DateTime, Utc};

use crate::{JwtClaims, PrincipalId, Role};

/// Authenticated session derived from a validated bearer token.
///
/// Created by the API middleware for every request and dropped with it;
/// there is no process-wide "logged in" state. A rejected token (401) is the
/// session's end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    principal_id: PrincipalId,
    roles: Vec<Role>,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        principal_id: PrincipalId,
        roles: Vec<Role>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            principal_id,
            roles,
            issued_at,
            expires_at,
        }
    }

    pub fn from_claims(claims: JwtClaims) -> Self {
        Self::new(claims.sub, claims.roles, claims.issued_at, claims.expires_at)
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
