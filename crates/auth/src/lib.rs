//! `levy-auth`: authentication and authorization boundary.
//!
//! Decoupled from HTTP and storage: the API layer turns a bearer token into a
//! [`Session`] and asks this crate whether the session may act.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod roles;
pub mod session;

pub use authorize::{AuthzError, CommandAuthorization, Principal, authorize, can_access};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
pub use principal::PrincipalId;
pub use roles::Role;
pub use session::Session;
