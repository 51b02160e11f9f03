use levy_auth::{PrincipalId, Role, Session};
use uuid::Uuid;

/// Per-request context inserted by the auth middleware.
///
/// Lives exactly as long as the request. Handlers read the caller's session
/// from here; nothing about the caller is kept between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    request_id: Uuid,
    session: Session,
}

impl RequestContext {
    pub fn new(session: Session) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            session,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.session.principal_id()
    }

    pub fn roles(&self) -> &[Role] {
        self.session.roles()
    }
}
