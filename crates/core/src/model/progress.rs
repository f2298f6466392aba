use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{ProgressId, StudentId};
use crate::model::word::GroupPlan;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("group size must be > 0")]
    InvalidGroupSize,

    #[error("word set has no words")]
    EmptyWordSet,

    #[error("group {0} does not exist")]
    UnknownGroup(u32),

    #[error("word index {0} does not exist")]
    UnknownWord(usize),

    #[error("word index {0} has more than one test result")]
    DuplicateWord(usize),

    #[error("task number {0} is not 1, 2 or 3")]
    UnknownTask(u8),

    #[error("task {task} of group {group} is locked")]
    TaskLocked { group: u32, task: TaskNumber },
}

//
// ─── STAGE ─────────────────────────────────────────────────────────────────────
//

/// Position of a word in the learning curriculum, always within `0..=7`.
///
/// Stage 0 means the student has not seen the word yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Stage(u8);

impl Stage {
    pub const UNSEEN: Stage = Stage(0);
    pub const MAX: Stage = Stage(7);

    /// Builds a stage from any integer, clamping into `0..=7`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn clamped(value: i64) -> Self {
        // Clamp keeps the value within u8 range.
        Stage(value.clamp(0, i64::from(Self::MAX.0)) as u8)
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_unseen(self) -> bool {
        self == Self::UNSEEN
    }

    /// Stage after passing a check: one step up, capped at 7.
    #[must_use]
    pub fn passed(self) -> Self {
        Self::clamped(i64::from(self.0) + 1)
    }

    /// Stage after failing a check: back to 1 once seen, otherwise unchanged.
    #[must_use]
    pub fn failed(self) -> Self {
        if self.is_unseen() { self } else { Stage(1) }
    }
}

impl From<i64> for Stage {
    fn from(value: i64) -> Self {
        Stage::clamped(value)
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> Self {
        stage.0
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//
// ─── TASKS ─────────────────────────────────────────────────────────────────────
//

/// The three tasks each group goes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TaskNumber {
    /// New-word learning.
    Task1,
    /// Quiz over the group's words.
    Task2,
    /// Mixed test over every group up to this one.
    Task3,
}

impl TaskNumber {
    pub const ALL: [TaskNumber; 3] = [TaskNumber::Task1, TaskNumber::Task2, TaskNumber::Task3];

    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            TaskNumber::Task1 => 1,
            TaskNumber::Task2 => 2,
            TaskNumber::Task3 => 3,
        }
    }
}

impl TryFrom<u8> for TaskNumber {
    type Error = ProgressError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskNumber::Task1),
            2 => Ok(TaskNumber::Task2),
            3 => Ok(TaskNumber::Task3),
            other => Err(ProgressError::UnknownTask(other)),
        }
    }
}

impl From<TaskNumber> for u8 {
    fn from(task: TaskNumber) -> Self {
        task.number()
    }
}

impl fmt::Display for TaskNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Rule deciding when the mixed-group test (Task 3) of a group unlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Task3Eligibility {
    /// Every group from 1 through the target has finished Task 1 and Task 2.
    #[default]
    Contiguous,
    /// At least as many groups as the target number have finished Task 1 and
    /// Task 2, wherever they are.
    CountBased,
}

impl Task3Eligibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Task3Eligibility::Contiguous => "contiguous",
            Task3Eligibility::CountBased => "count",
        }
    }
}

impl FromStr for Task3Eligibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contiguous" => Ok(Task3Eligibility::Contiguous),
            "count" | "count-based" => Ok(Task3Eligibility::CountBased),
            other => Err(format!("unknown task3 policy: {other}")),
        }
    }
}

//
// ─── PER-WORD AND PER-GROUP STATE ──────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordProgress {
    pub word_index: usize,
    pub current_stage: Stage,
    pub last_updated: DateTime<Utc>,
}

impl WordProgress {
    #[must_use]
    pub fn unseen(word_index: usize, at: DateTime<Utc>) -> Self {
        Self {
            word_index,
            current_stage: Stage::UNSEEN,
            last_updated: at,
        }
    }

    pub fn set_stage(&mut self, stage: i64, at: DateTime<Utc>) {
        self.current_stage = Stage::clamped(stage);
        self.last_updated = at;
    }
}

/// Task flags for one group. Flags only ever go from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct GroupProgress {
    pub group_number: u32,
    pub task1_completed: bool,
    pub task2_completed: bool,
    pub task3_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GroupProgress {
    #[must_use]
    pub fn new(group_number: u32) -> Self {
        Self {
            group_number,
            task1_completed: false,
            task2_completed: false,
            task3_completed: false,
            completed_at: None,
        }
    }

    /// Task 1 and Task 2 are both done.
    #[must_use]
    pub fn is_learned(&self) -> bool {
        self.task1_completed && self.task2_completed
    }

    #[must_use]
    pub fn is_done(&self, task: TaskNumber) -> bool {
        match task {
            TaskNumber::Task1 => self.task1_completed,
            TaskNumber::Task2 => self.task2_completed,
            TaskNumber::Task3 => self.task3_completed,
        }
    }

    /// Task numbers completed so far, ascending.
    #[must_use]
    pub fn completed_tasks(&self) -> Vec<TaskNumber> {
        TaskNumber::ALL
            .into_iter()
            .filter(|task| self.is_done(*task))
            .collect()
    }
}

//
// ─── STUDENT PROGRESS ──────────────────────────────────────────────────────────
//

/// Learning state of one student over one word set.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentProgress {
    student_id: StudentId,
    word_set_name: String,
    plan: GroupPlan,
    current_group: u32,
    groups: Vec<GroupProgress>,
    words: Vec<WordProgress>,
    eligibility: Task3Eligibility,
}

impl StudentProgress {
    /// Fresh progress: every group untouched, every word unseen.
    ///
    /// # Errors
    ///
    /// Returns `InvalidGroupSize` for a zero group size and `EmptyWordSet`
    /// when there are no words.
    pub fn start(
        student_id: StudentId,
        word_set_name: impl Into<String>,
        total_words: usize,
        group_size: usize,
        at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        let plan = GroupPlan::new(total_words, group_size)?;
        if total_words == 0 {
            return Err(ProgressError::EmptyWordSet);
        }

        Ok(Self {
            student_id,
            word_set_name: word_set_name.into(),
            plan,
            current_group: 1,
            groups: (1..=plan.total_groups()).map(GroupProgress::new).collect(),
            words: (0..total_words).map(|i| WordProgress::unseen(i, at)).collect(),
            eligibility: Task3Eligibility::default(),
        })
    }

    /// Replaces the Task 3 unlocking rule.
    #[must_use]
    pub fn with_eligibility(mut self, eligibility: Task3Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.student_id
    }

    #[must_use]
    pub fn word_set_name(&self) -> &str {
        &self.word_set_name
    }

    #[must_use]
    pub fn plan(&self) -> GroupPlan {
        self.plan
    }

    #[must_use]
    pub fn total_words(&self) -> usize {
        self.plan.total_words()
    }

    #[must_use]
    pub fn total_groups(&self) -> u32 {
        self.plan.total_groups()
    }

    #[must_use]
    pub fn current_group(&self) -> u32 {
        self.current_group
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupProgress] {
        &self.groups
    }

    #[must_use]
    pub fn words(&self) -> &[WordProgress] {
        &self.words
    }

    #[must_use]
    pub fn eligibility(&self) -> Task3Eligibility {
        self.eligibility
    }

    #[must_use]
    pub fn group(&self, group: u32) -> Option<&GroupProgress> {
        let idx = usize::try_from(group.checked_sub(1)?).ok()?;
        self.groups.get(idx)
    }

    fn group_mut(&mut self, group: u32) -> Result<&mut GroupProgress, ProgressError> {
        let idx = group
            .checked_sub(1)
            .and_then(|i| usize::try_from(i).ok())
            .ok_or(ProgressError::UnknownGroup(group))?;
        self.groups
            .get_mut(idx)
            .ok_or(ProgressError::UnknownGroup(group))
    }

    /// Number of groups with both Task 1 and Task 2 done.
    #[must_use]
    pub fn completed_groups_count(&self) -> usize {
        self.groups.iter().filter(|g| g.is_learned()).count()
    }

    /// Whether `task` of `group` may be started now.
    ///
    /// Unknown groups are never startable.
    #[must_use]
    pub fn can_start_task(&self, group: u32, task: TaskNumber) -> bool {
        let Some(target) = self.group(group) else {
            return false;
        };
        match task {
            TaskNumber::Task1 => true,
            TaskNumber::Task2 => target.task1_completed,
            TaskNumber::Task3 => match self.eligibility {
                Task3Eligibility::Contiguous => self
                    .groups
                    .iter()
                    .take_while(|g| g.group_number <= group)
                    .all(GroupProgress::is_learned),
                Task3Eligibility::CountBased => {
                    usize::try_from(group).is_ok_and(|g| self.completed_groups_count() >= g)
                }
            },
        }
    }

    /// Marks a task done. Completing an already-done task is a no-op.
    ///
    /// Task 3 also stamps the group's completion time and moves
    /// `current_group` forward to the next group.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` for a group outside the plan and `TaskLocked`
    /// when the task's prerequisites are not met.
    pub fn complete_task(
        &mut self,
        group: u32,
        task: TaskNumber,
        at: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let target = self
            .group(group)
            .ok_or(ProgressError::UnknownGroup(group))?;
        if target.is_done(task) {
            return Ok(());
        }

        let locked = !self.can_start_task(group, task)
            || (task == TaskNumber::Task3 && !target.is_learned());
        if locked {
            return Err(ProgressError::TaskLocked { group, task });
        }

        let total_groups = self.total_groups();
        let entry = self.group_mut(group)?;
        match task {
            TaskNumber::Task1 => entry.task1_completed = true,
            TaskNumber::Task2 => entry.task2_completed = true,
            TaskNumber::Task3 => {
                entry.task3_completed = true;
                entry.completed_at = Some(at);
                let next = (group + 1).min(total_groups);
                self.current_group = self.current_group.max(next);
            }
        }
        Ok(())
    }

    /// Every group has passed its mixed test.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.groups.iter().all(|g| g.task3_completed)
    }

    /// Sets a word's stage, clamped into `0..=7`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownWord` when `word_index` is out of range.
    pub fn set_word_stage(
        &mut self,
        word_index: usize,
        stage: i64,
        at: DateTime<Utc>,
    ) -> Result<Stage, ProgressError> {
        let word = self
            .words
            .get_mut(word_index)
            .ok_or(ProgressError::UnknownWord(word_index))?;
        word.set_stage(stage, at);
        Ok(word.current_stage)
    }

    #[must_use]
    pub fn word_stage(&self, word_index: usize) -> Option<Stage> {
        self.words.get(word_index).map(|w| w.current_stage)
    }

    /// Applies pass/fail outcomes of a test to the tested words.
    ///
    /// All indices are checked before any stage changes.
    ///
    /// # Errors
    ///
    /// Returns `UnknownWord` for the first index out of range and
    /// `DuplicateWord` for the first index tested twice.
    pub fn apply_test_results(
        &mut self,
        results: &[(usize, bool)],
        at: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let mut seen = vec![false; self.words.len()];
        for &(idx, _) in results {
            let slot = seen.get_mut(idx).ok_or(ProgressError::UnknownWord(idx))?;
            if std::mem::replace(slot, true) {
                return Err(ProgressError::DuplicateWord(idx));
            }
        }
        for &(idx, passed) in results {
            if let Some(word) = self.words.get_mut(idx) {
                let next = if passed {
                    word.current_stage.passed()
                } else {
                    word.current_stage.failed()
                };
                word.set_stage(i64::from(next.value()), at);
            }
        }
        Ok(())
    }

    /// Word counts per stage, index `n` holding the count at stage `n`.
    #[must_use]
    pub fn stage_histogram(&self) -> [usize; 8] {
        let mut out = [0usize; 8];
        for word in &self.words {
            out[usize::from(word.current_stage.value())] += 1;
        }
        out
    }

    /// Completed tasks keyed by group number, as the backend stores them.
    ///
    /// Groups without any completed task are left out.
    #[must_use]
    pub fn tasks_completed_map(&self) -> BTreeMap<String, Vec<u8>> {
        self.groups
            .iter()
            .filter_map(|g| {
                let tasks: Vec<u8> = g.completed_tasks().into_iter().map(TaskNumber::number).collect();
                (!tasks.is_empty()).then(|| (g.group_number.to_string(), tasks))
            })
            .collect()
    }

    /// One backend record per word, each carrying the shared task map.
    #[must_use]
    pub fn to_records(&self) -> Vec<ProgressUpsert> {
        let tasks = self.tasks_completed_map();
        self.words
            .iter()
            .map(|w| ProgressUpsert {
                student_id: self.student_id,
                word_set_name: self.word_set_name.clone(),
                word_index: w.word_index,
                current_stage: w.current_stage,
                total_groups: self.total_groups(),
                tasks_completed: tasks.clone(),
            })
            .collect()
    }

    /// Rebuilds progress from backend records.
    ///
    /// Words without a record start unseen; task maps from all records are
    /// merged, so a task done anywhere counts as done. `current_group` is the
    /// furthest group reached through completed mixed tests.
    ///
    /// # Errors
    ///
    /// Same as [`StudentProgress::start`], plus `UnknownTask` for task numbers
    /// outside 1..=3.
    pub fn from_records(
        student_id: StudentId,
        word_set_name: impl Into<String>,
        total_words: usize,
        group_size: usize,
        records: &[ProgressRecord],
        at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        let mut progress = Self::start(student_id, word_set_name, total_words, group_size, at)?;

        for record in records {
            if let Some(word) = progress.words.get_mut(record.word_index) {
                word.current_stage = record.current_stage;
                word.last_updated = record.updated_at.unwrap_or(at);
            }
            for (group_key, tasks) in &record.tasks_completed {
                let Ok(group) = group_key.trim().parse::<u32>() else {
                    continue;
                };
                let Ok(entry) = progress.group_mut(group) else {
                    continue;
                };
                for raw in tasks {
                    match TaskNumber::try_from(*raw)? {
                        TaskNumber::Task1 => entry.task1_completed = true,
                        TaskNumber::Task2 => entry.task2_completed = true,
                        TaskNumber::Task3 => entry.task3_completed = true,
                    }
                }
            }
        }

        let total_groups = progress.total_groups();
        for entry in &mut progress.groups {
            // A stored Task 3 without its prerequisites still implies them.
            if entry.task3_completed {
                entry.task1_completed = true;
                entry.task2_completed = true;
                entry.completed_at.get_or_insert(at);
            }
        }
        progress.current_group = progress
            .groups
            .iter()
            .filter(|g| g.task3_completed)
            .map(|g| (g.group_number + 1).min(total_groups))
            .max()
            .unwrap_or(1);

        Ok(progress)
    }
}

//
// ─── BACKEND RECORDS ───────────────────────────────────────────────────────────
//

/// One per-word row of `/api/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub id: ProgressId,
    pub student_id: StudentId,
    pub word_set_name: String,
    pub word_index: usize,
    pub current_stage: Stage,
    pub total_groups: u32,
    #[serde(default)]
    pub tasks_completed: BTreeMap<String, Vec<u8>>,
    #[serde(default, with = "crate::time::serde_utc::option")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Body of a create-or-update call; the backend keys it by
/// (student, word set, word index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpsert {
    pub student_id: StudentId,
    pub word_set_name: String,
    pub word_index: usize,
    pub current_stage: Stage,
    pub total_groups: u32,
    pub tasks_completed: BTreeMap<String, Vec<u8>>,
}

/// Words per stage for one word set, as `grid_0..grid_8` from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GridStats {
    #[serde(default)]
    pub grid_0: u32,
    #[serde(default)]
    pub grid_1: u32,
    #[serde(default)]
    pub grid_2: u32,
    #[serde(default)]
    pub grid_3: u32,
    #[serde(default)]
    pub grid_4: u32,
    #[serde(default)]
    pub grid_5: u32,
    #[serde(default)]
    pub grid_6: u32,
    #[serde(default)]
    pub grid_7: u32,
    #[serde(default)]
    pub grid_8: u32,
}

impl GridStats {
    #[must_use]
    pub fn total(&self) -> u64 {
        [
            self.grid_0,
            self.grid_1,
            self.grid_2,
            self.grid_3,
            self.grid_4,
            self.grid_5,
            self.grid_6,
            self.grid_7,
            self.grid_8,
        ]
        .into_iter()
        .map(u64::from)
        .sum()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
