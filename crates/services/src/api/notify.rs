use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, warn};

/// User-facing message raised by the API client when a call fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The token was rejected; the session is gone and the user must sign in.
    SessionExpired { message: String },
    Error(String),
    Warning(String),
}

impl Notification {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Notification::SessionExpired { message }
            | Notification::Error(message)
            | Notification::Warning(message) => message,
        }
    }

    #[must_use]
    pub fn requires_login(&self) -> bool {
        matches!(self, Notification::SessionExpired { .. })
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Warning(message) => write!(f, "warning: {message}"),
            other => write!(f, "error: {}", other.message()),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sends notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Warning(message) => warn!(%message, "api warning"),
            Notification::SessionExpired { message } => {
                warn!(%message, "session expired, redirecting to login");
            }
            Notification::Error(message) => error!(%message, "api error"),
        }
    }
}

/// Keeps notifications until they are taken.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    inner: Arc<Mutex<Vec<Notification>>>,
}

impl MemoryNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn all(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drains every pending notification.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: Notification) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }
}

/// Hands each notification to several notifiers in turn.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    #[must_use]
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, notification: Notification) {
        for target in &self.targets {
            target.notify(notification.clone());
        }
    }
}
