//! API-side authorization.
//!
//! Roles carried by the token are expanded into permissions here; mutations
//! are checked before they reach the services. Administrative surfaces are
//! gated on the role itself with [`can_access`].

use levy_auth::{AuthzError, Permission, Principal, Role, authorize, can_access};

use crate::context::RequestContext;

pub const INVOICES_READ: &str = "invoices.read";
pub const INVOICES_WRITE: &str = "invoices.write";
pub const PAYMENTS_READ: &str = "payments.read";
pub const PAYMENTS_WRITE: &str = "payments.write";
pub const DIRECTORY_READ: &str = "directory.read";

/// Role to permission mapping. `admin` holds the wildcard.
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    let mut permissions = Vec::new();
    for role in roles {
        if role.is_admin() {
            return vec![Permission::new("*")];
        }
        let granted: &[&'static str] = if *role == Role::TREASURER {
            &[INVOICES_READ, INVOICES_WRITE, PAYMENTS_READ, PAYMENTS_WRITE, DIRECTORY_READ]
        } else if *role == Role::MEMBER {
            &[INVOICES_READ, PAYMENTS_READ, DIRECTORY_READ]
        } else {
            &[]
        };
        permissions.extend(granted.iter().map(|p| Permission::new(*p)));
    }
    permissions
}

/// Check one permission for the caller. Call before dispatching a command.
pub fn require_permission(ctx: &RequestContext, required: &'static str) -> Result<(), AuthzError> {
    let principal = Principal {
        principal_id: ctx.principal_id(),
        roles: ctx.roles().to_vec(),
        permissions: permissions_from_roles(ctx.roles()),
    };
    authorize(&principal, &Permission::new(required))
}

/// Role gate for billing runs and association settings.
pub fn require_role(ctx: &RequestContext, required: &Role) -> Result<(), AuthzError> {
    if can_access(ctx.session(), required) {
        Ok(())
    } else {
        Err(AuthzError::MissingRole(required.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use levy_auth::{PrincipalId, Session};

    use super::*;

    fn ctx(roles: Vec<Role>) -> RequestContext {
        let now = Utc::now();
        RequestContext::new(Session::new(PrincipalId::new(), roles, now, now + Duration::minutes(5)))
    }

    #[test]
    fn member_reads_but_cannot_write() {
        let member = ctx(vec![Role::MEMBER]);
        assert!(require_permission(&member, INVOICES_READ).is_ok());
        assert!(require_permission(&member, PAYMENTS_READ).is_ok());
        assert_eq!(
            require_permission(&member, PAYMENTS_WRITE).unwrap_err(),
            AuthzError::Forbidden(PAYMENTS_WRITE.to_string())
        );
    }

    #[test]
    fn treasurer_handles_invoices_and_payments_only() {
        let treasurer = ctx(vec![Role::TREASURER]);
        assert!(require_permission(&treasurer, INVOICES_WRITE).is_ok());
        assert!(require_permission(&treasurer, PAYMENTS_WRITE).is_ok());
        assert!(require_role(&treasurer, &Role::ADMIN).is_err());
    }

    #[test]
    fn admin_passes_every_check() {
        let admin = ctx(vec![Role::ADMIN]);
        assert!(require_permission(&admin, PAYMENTS_WRITE).is_ok());
        assert!(require_role(&admin, &Role::ADMIN).is_ok());
    }

    #[test]
    fn unknown_roles_grant_nothing() {
        let guest = ctx(vec![Role::new("guest")]);
        assert!(require_permission(&guest, INVOICES_READ).is_err());
    }
}
