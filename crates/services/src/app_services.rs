use std::sync::Arc;

use storage::LocalDatabase;

use crate::Clock;
use crate::api::{ApiClient, HttpTransport, Notifier, ReqwestTransport};
use crate::config::ClientConfig;
use crate::context::AppContext;
use crate::error::AppServicesError;
use crate::learning_flow::LearningFlowService;
use crate::stores::{
    AntiForgetStore, AuthStore, ProgressStore, ScheduleStore, StudentReviewStore, StudentStore, WordStore,
};

/// Assembles every store around one context, API client and local database.
#[derive(Clone)]
pub struct AppServices {
    config: ClientConfig,
    context: Arc<AppContext>,
    local: LocalDatabase,
    auth: Arc<AuthStore>,
    students: Arc<StudentStore>,
    words: Arc<WordStore>,
    schedules: Arc<ScheduleStore>,
    progress: Arc<ProgressStore>,
    anti_forget: Arc<AntiForgetStore>,
    reviews: Arc<StudentReviewStore>,
    learning_flow: Arc<LearningFlowService>,
}

impl AppServices {
    /// Build services backed by `SQLite` and a JSON blob file, talking to the
    /// configured backend over HTTP. Failed calls are reported to `notifier`.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if the local database cannot be opened or
    /// the HTTP client cannot be built.
    pub async fn new_sqlite(
        config: ClientConfig,
        clock: Clock,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AppServicesError> {
        let local = LocalDatabase::open(&config.db_url, &config.blob_path, clock).await?;
        let transport = ReqwestTransport::new(config.api_base_url.clone(), config.timeout)?;
        Ok(Self::from_parts(
            config,
            clock,
            Arc::new(AppContext::new()),
            Arc::new(transport),
            notifier,
            local,
        ))
    }

    /// Build services from ready-made parts.
    #[must_use]
    pub fn from_parts(
        config: ClientConfig,
        clock: Clock,
        context: Arc<AppContext>,
        transport: Arc<dyn HttpTransport>,
        notifier: Arc<dyn Notifier>,
        local: LocalDatabase,
    ) -> Self {
        let api = ApiClient::new(transport, Arc::clone(&context), notifier).with_local(local.clone());

        let auth = Arc::new(AuthStore::new(api.clone(), local.clone()));
        let students = Arc::new(StudentStore::new(api.clone(), local.clone(), clock));
        let words = Arc::new(WordStore::new(api.clone(), local.clone()));
        let schedules = Arc::new(ScheduleStore::new(api.clone(), local.clone(), clock));
        let progress = Arc::new(ProgressStore::new(api.clone(), local.clone(), clock));
        let anti_forget = Arc::new(AntiForgetStore::new(api.clone()));
        let reviews = Arc::new(StudentReviewStore::new(api));
        let learning_flow = Arc::new(
            LearningFlowService::new(
                Arc::clone(&words),
                Arc::clone(&progress),
                Arc::clone(&reviews),
                Arc::clone(&anti_forget),
                Arc::clone(&context),
                clock,
            )
            .with_group_size(config.group_size)
            .with_eligibility(config.task3_policy),
        );

        Self {
            config,
            context,
            local,
            auth,
            students,
            words,
            schedules,
            progress,
            anti_forget,
            reviews,
            learning_flow,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn context(&self) -> Arc<AppContext> {
        Arc::clone(&self.context)
    }

    #[must_use]
    pub fn local(&self) -> &LocalDatabase {
        &self.local
    }

    #[must_use]
    pub fn auth(&self) -> Arc<AuthStore> {
        Arc::clone(&self.auth)
    }

    #[must_use]
    pub fn students(&self) -> Arc<StudentStore> {
        Arc::clone(&self.students)
    }

    #[must_use]
    pub fn words(&self) -> Arc<WordStore> {
        Arc::clone(&self.words)
    }

    #[must_use]
    pub fn schedules(&self) -> Arc<ScheduleStore> {
        Arc::clone(&self.schedules)
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressStore> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn anti_forget(&self) -> Arc<AntiForgetStore> {
        Arc::clone(&self.anti_forget)
    }

    #[must_use]
    pub fn reviews(&self) -> Arc<StudentReviewStore> {
        Arc::clone(&self.reviews)
    }

    #[must_use]
    pub fn learning_flow(&self) -> Arc<LearningFlowService> {
        Arc::clone(&self.learning_flow)
    }
}
