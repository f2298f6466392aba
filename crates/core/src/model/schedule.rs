use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::ids::{ScheduleId, StudentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseType {
    #[default]
    Learning,
    Review,
}

/// Class size, which also fixes the lesson length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassType {
    #[default]
    Big,
    Small,
}

impl ClassType {
    #[must_use]
    pub fn minutes(self) -> u32 {
        match self {
            ClassType::Big => 60,
            ClassType::Small => 30,
        }
    }
}

/// A scheduled lesson. `date` and `time` are local wall-clock values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub student_id: StudentId,
    pub student_name: String,
    pub date: NaiveDate,
    /// `HH:MM`
    pub time: String,
    pub word_set_name: String,
    #[serde(default)]
    pub course_type: CourseType,
    #[serde(default = "default_duration")]
    pub duration: u32,
    #[serde(default)]
    pub class_type: ClassType,
    #[serde(default)]
    pub completed: bool,
}

fn default_duration() -> u32 {
    60
}

impl Schedule {
    #[must_use]
    pub fn is_review(&self) -> bool {
        self.course_type == CourseType::Review
    }
}

/// Lessons sharing one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateGroup {
    pub date: NaiveDate,
    pub schedules: Vec<Schedule>,
}

/// Lessons from `today` on, grouped by date ascending, each group sorted by time.
#[must_use]
pub fn group_upcoming(schedules: &[Schedule], today: NaiveDate) -> Vec<DateGroup> {
    let mut by_date: BTreeMap<NaiveDate, Vec<Schedule>> = BTreeMap::new();
    for schedule in schedules.iter().filter(|s| s.date >= today) {
        by_date.entry(schedule.date).or_default().push(schedule.clone());
    }

    by_date
        .into_iter()
        .map(|(date, mut schedules)| {
            schedules.sort_by(|a, b| a.time.cmp(&b.time));
            DateGroup { date, schedules }
        })
        .collect()
}

/// Review lessons due today and not yet done.
#[must_use]
pub fn today_review_count(schedules: &[Schedule], today: NaiveDate) -> usize {
    schedules
        .iter()
        .filter(|s| s.date == today && s.is_review() && !s.completed)
        .count()
}

/// Collapsed/expanded flag per date group; groups are expanded unless toggled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpandedStates(BTreeMap<NaiveDate, bool>);

impl ExpandedStates {
    #[must_use]
    pub fn is_expanded(&self, date: NaiveDate) -> bool {
        self.0.get(&date).copied().unwrap_or(true)
    }

    /// Flips the flag for `date` and returns the new state.
    pub fn toggle(&mut self, date: NaiveDate) -> bool {
        let next = !self.is_expanded(date);
        self.0.insert(date, next);
        next
    }
}
