use std::time::Duration;

/// Learning time allowed per lesson before moving on to the post-learning test.
pub const COURSE_TIME_LIMIT_MINUTES: u64 = 10;
pub const COURSE_TIME_LIMIT_SECONDS: u64 = COURSE_TIME_LIMIT_MINUTES * 60;

/// How long before the limit the teacher gets a warning.
pub const TIME_WARNING_BEFORE_MINUTES: u64 = 5;
pub const TIME_WARNING_BEFORE_SECONDS: u64 = TIME_WARNING_BEFORE_MINUTES * 60;

/// Lesson time budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseTimer {
    limit: Duration,
    warn_before: Duration,
}

impl Default for CourseTimer {
    fn default() -> Self {
        Self {
            limit: Duration::from_secs(COURSE_TIME_LIMIT_SECONDS),
            warn_before: Duration::from_secs(TIME_WARNING_BEFORE_SECONDS),
        }
    }
}

impl CourseTimer {
    #[must_use]
    pub fn new(limit: Duration, warn_before: Duration) -> Self {
        Self { limit, warn_before }
    }

    #[must_use]
    pub fn limit(&self) -> Duration {
        self.limit
    }

    #[must_use]
    pub fn remaining(&self, elapsed: Duration) -> Duration {
        self.limit.saturating_sub(elapsed)
    }

    /// Inside the warning window but not yet over the limit.
    #[must_use]
    pub fn is_warning(&self, elapsed: Duration) -> bool {
        !self.is_expired(elapsed) && self.remaining(elapsed) <= self.warn_before
    }

    #[must_use]
    pub fn is_expired(&self, elapsed: Duration) -> bool {
        elapsed >= self.limit
    }
}
