use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tutor_core::model::{Role, User, UserId};

/// Key of the persisted session in the `currentUser` store.
pub const SESSION_KEY: &str = "session";

/// Bearer token plus the account it belongs to, once known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSession {
    pub token: String,
    pub user: Option<User>,
}

/// Authentication state shared by every store and the API client.
#[derive(Debug, Default)]
pub struct AppContext {
    session: RwLock<Option<AuthSession>>,
}

impl AppContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_session(session: AuthSession) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_session(&self, session: AuthSession) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
    }

    /// Stores a fresh token; any previously known user is dropped.
    pub fn set_token(&self, token: impl Into<String>) {
        self.set_session(AuthSession {
            token: token.into(),
            user: None,
        });
    }

    /// Attaches the account to the current token. Without a token this is a no-op.
    pub fn set_user(&self, user: User) {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = guard.as_mut() {
            session.user = Some(user);
        }
    }

    pub fn clear(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.session().map(|s| s.token)
    }

    #[must_use]
    pub fn current_user(&self) -> Option<User> {
        self.session().and_then(|s| s.user)
    }

    #[must_use]
    pub fn current_user_id(&self) -> Option<UserId> {
        self.current_user().map(|u| u.id)
    }

    /// Both a token and its account are known.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.session().is_some_and(|s| s.user.is_some())
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    #[must_use]
    pub fn is_student(&self) -> bool {
        self.has_role(Role::Student)
    }

    fn has_role(&self, role: Role) -> bool {
        self.current_user().is_some_and(|u| u.role == role)
    }
}
