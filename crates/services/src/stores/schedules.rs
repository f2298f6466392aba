use std::sync::Mutex;

use chrono::NaiveDate;
use storage::{LocalDatabase, StoreName};
use tracing::{info, warn};
use tutor_core::Clock;
use tutor_core::model::{DateGroup, ExpandedStates, Schedule, ScheduleId, UserId, group_upcoming, today_review_count};

use crate::api::{ApiClient, ApiRequest};
use crate::error::StoreError;
use crate::stores::{is_offline, load_owned, lock, persist, persist_owned};

/// Settings key holding the per-date collapsed/expanded flags.
pub const EXPANDED_STATES_KEY: &str = "schedule_expanded_states";

pub struct ScheduleStore {
    api: ApiClient,
    local: LocalDatabase,
    clock: Clock,
    schedules: Mutex<Vec<Schedule>>,
}

impl ScheduleStore {
    #[must_use]
    pub fn new(api: ApiClient, local: LocalDatabase, clock: Clock) -> Self {
        Self {
            api,
            local,
            clock,
            schedules: Mutex::new(Vec::new()),
        }
    }

    /// Lessons of the signed-in teacher, or of `teacher` when an admin asks.
    ///
    /// Offline, answers from the lessons this account was last shown.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails and no local copy helps.
    pub async fn fetch_schedules(&self, teacher: Option<&UserId>) -> Result<Vec<Schedule>, StoreError> {
        let mut request = ApiRequest::get(&["api", "schedules"]);
        if let Some(teacher) = teacher {
            request = request.query("teacher_id", teacher);
        }

        let owner = self.owner();
        let schedules: Vec<Schedule> = match self.api.call(request).await {
            Ok(schedules) => schedules,
            Err(err) if is_offline(&err) => {
                let cached: Vec<Schedule> = load_owned(&self.local, StoreName::Schedules, owner.as_ref()).await?;
                if cached.is_empty() {
                    return Err(err.into());
                }
                warn!(count = cached.len(), "backend unreachable, using local schedules");
                cached
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(owner) = &owner {
            for schedule in &schedules {
                persist_owned(&self.local, StoreName::Schedules, owner, &schedule.id.to_string(), schedule).await;
            }
        }
        lock(&self.schedules).clone_from(&schedules);
        Ok(schedules)
    }

    fn owner(&self) -> Option<UserId> {
        self.api.context().current_user_id()
    }

    #[must_use]
    pub fn schedules(&self) -> Vec<Schedule> {
        lock(&self.schedules).clone()
    }

    /// Marks a lesson as held.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn complete_schedule(&self, id: ScheduleId) -> Result<(), StoreError> {
        let key = id.to_string();
        self.api
            .send(ApiRequest::put(&["api", "schedules", key.as_str(), "complete"]))
            .await?;

        let updated = {
            let mut schedules = lock(&self.schedules);
            schedules.iter_mut().find(|s| s.id == id).map(|s| {
                s.completed = true;
                s.clone()
            })
        };
        if let (Some(schedule), Some(owner)) = (updated, self.owner()) {
            persist_owned(&self.local, StoreName::Schedules, &owner, &key, &schedule).await;
        }
        info!(schedule = %id, "lesson completed");
        Ok(())
    }

    /// Mirrored lessons from today on, grouped by date.
    #[must_use]
    pub fn grouped_upcoming(&self) -> Vec<DateGroup> {
        group_upcoming(&lock(&self.schedules), self.clock.today())
    }

    #[must_use]
    pub fn today_review_count(&self) -> usize {
        today_review_count(&lock(&self.schedules), self.clock.today())
    }

    async fn expanded_states(&self) -> ExpandedStates {
        match self.local.load(StoreName::Settings, EXPANDED_STATES_KEY).await {
            Ok(states) => states.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "unreadable expanded states, starting fresh");
                ExpandedStates::default()
            }
        }
    }

    pub async fn is_expanded(&self, date: NaiveDate) -> bool {
        self.expanded_states().await.is_expanded(date)
    }

    /// Flips the date group's flag, persists it, and returns the new state.
    pub async fn toggle_expanded(&self, date: NaiveDate) -> bool {
        let mut states = self.expanded_states().await;
        let expanded = states.toggle(date);
        persist(&self.local, StoreName::Settings, EXPANDED_STATES_KEY, &states).await;
        expanded
    }
}
