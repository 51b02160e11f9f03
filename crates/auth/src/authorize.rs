use std::collections::HashSet;

use thiserror::Error;

use crate::{Permission, PrincipalId, Role, Session};

/// A principal resolved for a permission decision.
///
/// The API derives the permission set from the session roles; this crate
/// only evaluates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub roles: Vec<Role>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("forbidden: role '{0}' required")]
    MissingRole(String),
}

/// Permissions a command needs, checked before it is dispatched.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Check a single permission. Pure: no IO, no panics.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    let perms: HashSet<&str> = principal.permissions.iter().map(|p| p.as_str()).collect();

    if perms.contains("*") || perms.contains(required.as_str()) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Role gate for administrative surfaces.
///
/// `admin` satisfies every role; any other role must be held exactly.
pub fn can_access(session: &Session, required: &Role) -> bool {
    session.roles().iter().any(|r| r.is_admin() || r == required)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn session_with(roles: Vec<Role>) -> Session {
        let now = Utc::now();
        Session::new(PrincipalId::new(), roles, now, now + Duration::minutes(5))
    }

    #[test]
    fn wildcard_grants_any_permission() {
        let principal = Principal {
            principal_id: PrincipalId::new(),
            roles: vec![Role::ADMIN],
            permissions: vec![Permission::new("*")],
        };
        assert!(authorize(&principal, &Permission::new("payments.write")).is_ok());
    }

    #[test]
    fn missing_permission_is_forbidden() {
        let principal = Principal {
            principal_id: PrincipalId::new(),
            roles: vec![Role::MEMBER],
            permissions: vec![Permission::new("invoices.read")],
        };
        let err = authorize(&principal, &Permission::new("payments.write")).unwrap_err();
        assert_eq!(err, AuthzError::Forbidden("payments.write".to_string()));
    }

    #[test]
    fn admin_can_access_every_role_gate() {
        let admin = session_with(vec![Role::ADMIN]);
        assert!(can_access(&admin, &Role::TREASURER));
        assert!(can_access(&admin, &Role::ADMIN));
    }

    #[test]
    fn non_admin_needs_the_exact_role() {
        let treasurer = session_with(vec![Role::TREASURER]);
        assert!(can_access(&treasurer, &Role::TREASURER));
        assert!(!can_access(&treasurer, &Role::ADMIN));
        assert!(!can_access(&session_with(vec![]), &Role::MEMBER));
    }
}
