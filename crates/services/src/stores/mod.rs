//! Per-entity stores.
//!
//! Each store talks to one group of REST endpoints and keeps an in-memory
//! mirror of what it fetched. Entities with a local store are also written
//! to the [`LocalDatabase`], which read-only fetches fall back to when the
//! backend cannot be reached.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use storage::{LocalDatabase, StorageError, StoreName};
use tracing::warn;
use tutor_core::model::UserId;

use crate::error::ApiError;

pub mod anti_forget;
pub mod auth;
pub mod progress;
pub mod schedules;
pub mod student_reviews;
pub mod students;
pub mod words;

pub use anti_forget::AntiForgetStore;
pub use auth::AuthStore;
pub use progress::{ProgressStore, WordProgressSnapshot};
pub use schedules::{EXPANDED_STATES_KEY, ScheduleStore};
pub use student_reviews::StudentReviewStore;
pub use students::StudentStore;
pub use words::WordStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes one mirrored entity; a failed local write is logged, not returned.
async fn persist<T: Serialize + ?Sized>(local: &LocalDatabase, store: StoreName, key: &str, value: &T) {
    if let Err(err) = local.save(store, Some(key), value).await {
        warn!(store = %store, key, error = %err, "local mirror write failed");
    }
}

/// Writes one mirrored entity on behalf of `owner`, tagging the document with
/// its `user_id` so that [`load_owned`] only hands it back to that account.
async fn persist_owned<T: Serialize + ?Sized>(
    local: &LocalDatabase,
    store: StoreName,
    owner: &UserId,
    key: &str,
    value: &T,
) {
    let mut doc = match serde_json::to_value(value) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(store = %store, key, error = %err, "entity not serializable, skipping local mirror");
            return;
        }
    };
    if let Value::Object(fields) = &mut doc {
        fields.insert("user_id".into(), Value::String(owner.to_string()));
    }
    persist(local, store, &format!("{owner}_{key}"), &doc).await;
}

/// Entities cached for `owner`; nothing when nobody is signed in.
async fn load_owned<T: DeserializeOwned>(
    local: &LocalDatabase,
    store: StoreName,
    owner: Option<&UserId>,
) -> Result<Vec<T>, StorageError> {
    match owner {
        Some(owner) => local.load_by_user(store, owner.as_str()).await,
        None => Ok(Vec::new()),
    }
}

async fn forget(local: &LocalDatabase, store: StoreName, key: &str) {
    if let Err(err) = local.delete(store, key).await {
        warn!(store = %store, key, error = %err, "local mirror delete failed");
    }
}

/// The backend was never reached, so the local copy is the best answer.
fn is_offline(err: &ApiError) -> bool {
    matches!(err, ApiError::Network(_))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use storage::LocalDatabase;
    use tutor_core::model::{Role, User, UserId};
    use tutor_core::time::fixed_now;

    use crate::api::{ApiClient, MemoryNotifier, StubTransport};
    use crate::context::{AppContext, AuthSession};

    pub(crate) struct Harness {
        pub transport: StubTransport,
        pub notifier: MemoryNotifier,
        pub context: Arc<AppContext>,
        pub local: LocalDatabase,
        pub api: ApiClient,
    }

    pub(crate) fn teacher() -> User {
        User {
            id: UserId::from("teacher-1"),
            username: "teacher".into(),
            role: Role::Teacher,
            display_name: "Teacher One".into(),
            email: None,
            created_at: fixed_now(),
            last_login_at: None,
            student_id: None,
        }
    }

    /// Logged-in teacher over a stub transport and an in-memory database.
    pub(crate) fn harness() -> Harness {
        let transport = StubTransport::new();
        let notifier = MemoryNotifier::new();
        let context = Arc::new(AppContext::with_session(AuthSession {
            token: "token".into(),
            user: Some(teacher()),
        }));
        let local = LocalDatabase::in_memory();
        let api = ApiClient::new(
            Arc::new(transport.clone()),
            Arc::clone(&context),
            Arc::new(notifier.clone()),
        )
        .with_local(local.clone());
        Harness {
            transport,
            notifier,
            context,
            local,
            api,
        }
    }
}
