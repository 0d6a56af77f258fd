use serde::{Deserialize, Serialize};

/// The authenticated caller as established by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            email: None,
        }
    }
}

/// Source of the current authenticated identity. The coordinator receives
/// one at construction and never consults any ambient global.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
}

/// Fixed identity source: a resolved caller (request-scoped binding) or
/// anonymous (unauthenticated contexts and tests).
#[derive(Debug, Clone)]
pub struct FixedIdentity(Option<Identity>);

impl FixedIdentity {
    pub fn caller(identity: Identity) -> Self {
        Self(Some(identity))
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self(Some(Identity::new(user_id)))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for FixedIdentity {
    fn current(&self) -> Option<Identity> {
        self.0.clone()
    }
}
