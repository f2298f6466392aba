#![forbid(unsafe_code)]

pub mod api;
pub mod app_services;
pub mod config;
pub mod context;
pub mod error;
pub mod learning_flow;
pub mod stores;

pub use tutor_core::Clock;

pub use api::{ApiClient, FanoutNotifier, MemoryNotifier, Notification, Notifier, ReqwestTransport, StubTransport, TracingNotifier};
pub use app_services::AppServices;
pub use config::ClientConfig;
pub use context::{AppContext, AuthSession};
pub use error::{ApiError, AppServicesError, ConfigError, LearningFlowError, StoreError};
pub use learning_flow::{LearningFlowService, LearningSession, PostTestOutcome};
pub use stores::{
    AntiForgetStore, AuthStore, ProgressStore, ScheduleStore, StudentReviewStore, StudentStore, WordStore,
};
