use std::sync::Arc;

use serde::Deserialize;
use storage::{LocalDatabase, StoreName};
use tracing::{info, warn};
use tutor_core::model::User;

use crate::api::ApiClient;
use crate::context::{AppContext, AuthSession, SESSION_KEY};
use crate::error::{ApiError, StoreError};
use crate::stores::{forget, persist};

#[derive(Debug, Deserialize)]
struct TokenReply {
    access_token: String,
}

/// Sign-in, sign-out and session restore.
pub struct AuthStore {
    api: ApiClient,
    local: LocalDatabase,
}

impl AuthStore {
    #[must_use]
    pub fn new(api: ApiClient, local: LocalDatabase) -> Self {
        Self { api, local }
    }

    fn context(&self) -> &Arc<AppContext> {
        self.api.context()
    }

    /// Exchanges credentials for a token, then loads the account.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when either call fails; the context is left
    /// signed out.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, StoreError> {
        self.context().clear();
        let reply: TokenReply = self
            .api
            .post_form(
                &["api", "auth", "login"],
                &[("username", username), ("password", password)],
            )
            .await?;
        self.context().set_token(reply.access_token);

        match self.fetch_current_user().await {
            Ok(user) => {
                info!(user = %user.id, role = %user.role, "signed in");
                Ok(user)
            }
            Err(err) => {
                self.logout().await;
                Err(err)
            }
        }
    }

    /// Loads the account behind the current token and persists the session.
    ///
    /// # Errors
    ///
    /// Returns `NotLoggedIn` without a token and `StoreError::Api` when the
    /// call fails.
    pub async fn fetch_current_user(&self) -> Result<User, StoreError> {
        if self.context().token().is_none() {
            return Err(StoreError::NotLoggedIn);
        }
        let user: User = self.api.get(&["api", "auth", "me"]).await?;
        self.context().set_user(user.clone());
        if let Some(session) = self.context().session() {
            persist(&self.local, StoreName::CurrentUser, SESSION_KEY, &session).await;
        }
        Ok(user)
    }

    /// Forgets the session, in memory and on disk.
    pub async fn logout(&self) {
        self.context().clear();
        forget(&self.local, StoreName::CurrentUser, SESSION_KEY).await;
    }

    /// Restores a persisted session and checks it against the backend.
    ///
    /// Offline, the persisted account is trusted as is. Any other failure
    /// signs the user out.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Storage` when the persisted session is unreadable.
    pub async fn initialize(&self) -> Result<Option<User>, StoreError> {
        let Some(saved) = self
            .local
            .load::<AuthSession>(StoreName::CurrentUser, SESSION_KEY)
            .await?
        else {
            return Ok(None);
        };
        let cached_user = saved.user.clone();
        self.context().set_session(saved);

        match self.fetch_current_user().await {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::Api(ApiError::Network(reason))) => {
                warn!(%reason, "backend unreachable, keeping saved session");
                Ok(cached_user)
            }
            Err(err) => {
                warn!(error = %err, "saved session rejected");
                self.logout().await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Body, Method, Notification, TransportError};
    use crate::stores::testing::{harness, teacher};
    use serde_json::json;

    fn me_json() -> serde_json::Value {
        json!({
            "id": "teacher-1",
            "username": "teacher",
            "role": "teacher",
            "display_name": "Teacher One",
            "created_at": "2025-01-14T08:00:00Z"
        })
    }

    #[tokio::test]
    async fn login_stores_token_user_and_session() {
        let h = harness();
        h.context.clear();
        h.transport.ok(
            Method::Post,
            "/api/auth/login",
            json!({"access_token": "jwt", "token_type": "bearer"}),
        );
        h.transport.ok(Method::Get, "/api/auth/me", me_json());
        let store = AuthStore::new(h.api.clone(), h.local.clone());

        let user = store.login("teacher", "secret").await.unwrap();

        assert_eq!(user.id.as_str(), "teacher-1");
        assert!(h.context.is_logged_in());
        let login = &h.transport.requests_to(Method::Post, "/api/auth/login")[0];
        assert_eq!(
            login.body,
            Body::Form(vec![
                ("username".into(), "teacher".into()),
                ("password".into(), "secret".into())
            ])
        );
        let me = &h.transport.requests_to(Method::Get, "/api/auth/me")[0];
        assert_eq!(me.bearer.as_deref(), Some("jwt"));
        let saved: Option<AuthSession> = h.local.load(StoreName::CurrentUser, SESSION_KEY).await.unwrap();
        assert_eq!(saved.map(|s| s.token), Some("jwt".to_owned()));
    }

    #[tokio::test]
    async fn bad_credentials_leave_context_signed_out() {
        let h = harness();
        h.transport.respond(
            Method::Post,
            "/api/auth/login",
            401,
            json!({"detail": "Incorrect username or password"}),
        );
        let store = AuthStore::new(h.api.clone(), h.local.clone());

        let err = store.login("teacher", "wrong").await.unwrap_err();

        assert!(matches!(err, StoreError::Api(ApiError::Unauthorized)));
        assert!(h.context.token().is_none());
        assert!(h.notifier.take()[0].requires_login());
    }

    #[tokio::test]
    async fn initialize_restores_and_refreshes() {
        let h = harness();
        h.local
            .save(
                StoreName::CurrentUser,
                Some(SESSION_KEY),
                &AuthSession {
                    token: "saved".into(),
                    user: Some(teacher()),
                },
            )
            .await
            .unwrap();
        h.context.clear();
        h.transport.ok(Method::Get, "/api/auth/me", me_json());
        let store = AuthStore::new(h.api.clone(), h.local.clone());

        let user = store.initialize().await.unwrap();

        assert!(user.is_some());
        assert_eq!(h.context.token().as_deref(), Some("saved"));
        assert!(h.context.is_logged_in());
    }

    #[tokio::test]
    async fn initialize_offline_keeps_saved_user() {
        let h = harness();
        h.local
            .save(
                StoreName::CurrentUser,
                Some(SESSION_KEY),
                &AuthSession {
                    token: "saved".into(),
                    user: Some(teacher()),
                },
            )
            .await
            .unwrap();
        h.context.clear();
        h.transport.fail(Method::Get, "/api/auth/me", TransportError::Timeout);
        let store = AuthStore::new(h.api.clone(), h.local.clone());

        let user = store.initialize().await.unwrap();

        assert_eq!(user, Some(teacher()));
        assert!(h.context.is_logged_in());
        assert_eq!(h.notifier.take(), vec![Notification::Error("network connection failed".into())]);
    }

    #[tokio::test]
    async fn initialize_with_rejected_token_signs_out() {
        let h = harness();
        h.local
            .save(
                StoreName::CurrentUser,
                Some(SESSION_KEY),
                &AuthSession {
                    token: "stale".into(),
                    user: None,
                },
            )
            .await
            .unwrap();
        h.transport.respond(Method::Get, "/api/auth/me", 401, json!({}));
        let store = AuthStore::new(h.api.clone(), h.local.clone());

        assert_eq!(store.initialize().await.unwrap(), None);
        assert!(!h.context.is_logged_in());
        let saved: Option<AuthSession> = h.local.load(StoreName::CurrentUser, SESSION_KEY).await.unwrap();
        assert!(saved.is_none());
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let h = harness();
        let store = AuthStore::new(h.api.clone(), h.local.clone());

        store.logout().await;

        assert!(h.context.session().is_none());
        assert!(matches!(store.fetch_current_user().await, Err(StoreError::NotLoggedIn)));
    }
}
