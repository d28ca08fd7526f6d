use tandem_types::models::CurrentUser;

/// Source of the signed-in user. Session storage itself lives elsewhere.
pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<CurrentUser>;
}

/// A user that was authenticated before the chat core started.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    user: CurrentUser,
}

impl StaticIdentity {
    pub fn new(user: CurrentUser) -> Self {
        Self { user }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<CurrentUser> {
        Some(self.user.clone())
    }
}
