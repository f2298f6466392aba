use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use storage::{LocalDatabase, StoreName};
use tracing::{debug, warn};
use tutor_core::Clock;
use tutor_core::model::{
    GridStats, ProgressError, ProgressRecord, ProgressUpsert, Stage, StudentId, StudentProgress, Task3Eligibility,
    TaskNumber,
};

use crate::api::{ApiClient, ApiRequest};
use crate::error::StoreError;
use crate::stores::{is_offline, lock, persist};

/// One word's stored progress; all zeros when the backend has nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WordProgressSnapshot {
    #[serde(default)]
    pub current_stage: Stage,
    #[serde(default)]
    pub total_groups: u32,
    #[serde(default)]
    pub tasks_completed: BTreeMap<String, Vec<u8>>,
}

type RecordKey = (StudentId, String, usize);

fn local_key(student_id: StudentId, word_set_name: &str, word_index: usize) -> String {
    format!("{student_id}_{word_set_name}_{word_index}")
}

/// Per-word progress rows on the backend, and the progression state built
/// from them.
pub struct ProgressStore {
    api: ApiClient,
    local: LocalDatabase,
    clock: Clock,
    records: Mutex<BTreeMap<RecordKey, ProgressRecord>>,
}

impl ProgressStore {
    #[must_use]
    pub fn new(api: ApiClient, local: LocalDatabase, clock: Clock) -> Self {
        Self {
            api,
            local,
            clock,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// A student's progress rows, optionally for one word set only.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails and no local copy helps.
    pub async fn fetch_student_progress(
        &self,
        student_id: StudentId,
        word_set_name: Option<&str>,
    ) -> Result<Vec<ProgressRecord>, StoreError> {
        let key = student_id.to_string();
        let mut request = ApiRequest::get(&["api", "progress", "student", key.as_str()]);
        if let Some(name) = word_set_name {
            request = request.query("word_set_name", name);
        }

        let records: Vec<ProgressRecord> = match self.api.call(request).await {
            Ok(records) => records,
            Err(err) if is_offline(&err) => {
                let cached: Vec<ProgressRecord> = self
                    .local
                    .load_all::<ProgressRecord>(StoreName::LearningProgress)
                    .await?
                    .into_iter()
                    .filter(|r| r.student_id == student_id)
                    .filter(|r| word_set_name.is_none_or(|name| r.word_set_name == name))
                    .collect();
                if cached.is_empty() {
                    return Err(err.into());
                }
                warn!(student = %student_id, count = cached.len(), "backend unreachable, using local progress");
                cached
            }
            Err(err) => return Err(err.into()),
        };

        for record in &records {
            self.remember(record.clone()).await;
        }
        Ok(records)
    }

    async fn remember(&self, record: ProgressRecord) {
        let key = local_key(record.student_id, &record.word_set_name, record.word_index);
        persist(&self.local, StoreName::LearningProgress, &key, &record).await;
        lock(&self.records).insert(
            (record.student_id, record.word_set_name.clone(), record.word_index),
            record,
        );
    }

    /// Mirrored rows of one student and word set, by word index.
    #[must_use]
    pub fn records(&self, student_id: StudentId, word_set_name: &str) -> Vec<ProgressRecord> {
        lock(&self.records)
            .values()
            .filter(|r| r.student_id == student_id && r.word_set_name == word_set_name)
            .cloned()
            .collect()
    }

    /// Creates or replaces the row for one word.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn save_progress(&self, upsert: &ProgressUpsert) -> Result<ProgressRecord, StoreError> {
        let record: ProgressRecord = self.api.post_json(&["api", "progress"], upsert).await?;
        self.remember(record.clone()).await;
        Ok(record)
    }

    /// Saves many rows in one call. Mirrored rows take the new values.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn batch_save_progress(&self, updates: &[ProgressUpsert]) -> Result<usize, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }
        self.api
            .send(ApiRequest::post(&["api", "progress", "batch-update"]).json(json!({ "updates": updates })))
            .await?;

        let now = self.clock.now();
        let changed: Vec<ProgressRecord> = {
            let mut records = lock(&self.records);
            updates
                .iter()
                .filter_map(|u| {
                    let record = records.get_mut(&(u.student_id, u.word_set_name.clone(), u.word_index))?;
                    record.current_stage = u.current_stage;
                    record.total_groups = u.total_groups;
                    record.tasks_completed.clone_from(&u.tasks_completed);
                    record.updated_at = Some(now);
                    Some(record.clone())
                })
                .collect()
        };
        for record in &changed {
            let key = local_key(record.student_id, &record.word_set_name, record.word_index);
            persist(&self.local, StoreName::LearningProgress, &key, record).await;
        }
        debug!(count = updates.len(), "progress batch saved");
        Ok(updates.len())
    }

    /// One word's row; defaults to an unseen word when the call fails.
    pub async fn get_word_progress(
        &self,
        student_id: StudentId,
        word_set_name: &str,
        word_index: usize,
    ) -> WordProgressSnapshot {
        let student = student_id.to_string();
        let index = word_index.to_string();
        let segments = [
            "api",
            "progress",
            "student",
            student.as_str(),
            "word",
            word_set_name,
            index.as_str(),
        ];
        match self.api.get(&segments).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(student = %student_id, word_set = word_set_name, word_index, error = %err, "word progress unavailable");
                WordProgressSnapshot::default()
            }
        }
    }

    /// Words per stage; zeros when the call fails.
    pub async fn grid_stats(&self, student_id: StudentId, word_set_name: &str) -> GridStats {
        let student = student_id.to_string();
        let segments = [
            "api",
            "progress",
            "student",
            student.as_str(),
            "word-set",
            word_set_name,
            "grid-stats",
        ];
        match self.api.get(&segments).await {
            Ok(stats) => stats,
            Err(err) => {
                warn!(student = %student_id, word_set = word_set_name, error = %err, "grid stats unavailable");
                GridStats::default()
            }
        }
    }

    /// Saves one word's current row from an in-memory progression.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Progress` for an unknown word index and
    /// `StoreError::Api` when the backend refuses.
    pub async fn update_word_progress(
        &self,
        progress: &StudentProgress,
        word_index: usize,
    ) -> Result<ProgressRecord, StoreError> {
        let upsert = progress
            .to_records()
            .into_iter()
            .find(|u| u.word_index == word_index)
            .ok_or(ProgressError::UnknownWord(word_index))?;
        self.save_progress(&upsert).await
    }

    /// Records a finished task on the backend.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn complete_task(
        &self,
        student_id: StudentId,
        word_set_name: &str,
        group: u32,
        task: TaskNumber,
    ) -> Result<Value, StoreError> {
        let body = json!({
            "student_id": student_id,
            "word_set_name": word_set_name,
            "group_number": group,
            "task_number": task,
        });
        Ok(self.api.post_json(&["api", "progress", "complete-task"], &body).await?)
    }

    /// Rebuilds the progression of one student and word set from stored rows.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Progress` for an empty word set or a bad group
    /// size, and `StoreError::Api` when the rows cannot be fetched.
    pub async fn load_progress(
        &self,
        student_id: StudentId,
        word_set_name: &str,
        total_words: usize,
        group_size: usize,
        eligibility: Task3Eligibility,
    ) -> Result<StudentProgress, StoreError> {
        let records = self.fetch_student_progress(student_id, Some(word_set_name)).await?;
        let progress = StudentProgress::from_records(
            student_id,
            word_set_name,
            total_words,
            group_size,
            &records,
            self.clock.now(),
        )?;
        Ok(progress.with_eligibility(eligibility))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Method, TransportError};
    use crate::stores::testing::harness;
    use tutor_core::time::{fixed_clock, fixed_now};

    fn record(id: u64, index: usize, stage: u8, tasks: serde_json::Value) -> serde_json::Value {
        json!({
            "id": id,
            "student_id": 3,
            "word_set_name": "Unit 1",
            "word_index": index,
            "current_stage": stage,
            "total_groups": 2,
            "tasks_completed": tasks,
            "updated_at": "2025-01-14T08:00:00"
        })
    }

    #[tokio::test]
    async fn load_progress_rebuilds_groups() {
        let h = harness();
        h.transport.ok(
            Method::Get,
            "/api/progress/student/3",
            json!([
                record(1, 0, 2, json!({"1": [1, 2, 3]})),
                record(2, 6, 1, json!({"2": [1]})),
            ]),
        );
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        let progress = store
            .load_progress(StudentId::new(3), "Unit 1", 8, 5, Task3Eligibility::Contiguous)
            .await
            .unwrap();

        assert_eq!(progress.current_group(), 2);
        assert!(progress.can_start_task(2, TaskNumber::Task2));
        assert_eq!(progress.word_stage(6), Some(Stage::clamped(1)));
        let sent = h.transport.requests_to(Method::Get, "/api/progress/student/3");
        assert_eq!(sent[0].query, vec![("word_set_name".to_owned(), "Unit 1".to_owned())]);
        assert_eq!(store.records(StudentId::new(3), "Unit 1").len(), 2);
    }

    #[tokio::test]
    async fn offline_load_uses_local_rows() {
        let h = harness();
        h.transport.ok(
            Method::Get,
            "/api/progress/student/3",
            json!([record(1, 0, 4, json!({"1": [1, 2, 3]}))]),
        );
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        store.fetch_student_progress(StudentId::new(3), Some("Unit 1")).await.unwrap();

        h.transport.fail(Method::Get, "/api/progress/student/3", TransportError::Timeout);
        let fresh = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        let progress = fresh
            .load_progress(StudentId::new(3), "Unit 1", 8, 5, Task3Eligibility::Contiguous)
            .await
            .unwrap();

        assert_eq!(progress.word_stage(0), Some(Stage::clamped(4)));
    }

    #[tokio::test]
    async fn failed_lookups_fall_back_to_zeros() {
        let h = harness();
        h.transport.respond(Method::Get, "/api/progress/student/3/word/Unit 1/4", 500, Value::Null);
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        let word = store.get_word_progress(StudentId::new(3), "Unit 1", 4).await;
        let grid = store.grid_stats(StudentId::new(3), "Unit 1").await;

        assert_eq!(word, WordProgressSnapshot::default());
        assert_eq!(grid.total(), 0);
    }

    #[tokio::test]
    async fn grid_stats_are_decoded() {
        let h = harness();
        h.transport.ok(
            Method::Get,
            "/api/progress/student/3/word-set/Unit 1/grid-stats",
            json!({"grid_0": 5, "grid_1": 2, "grid_7": 1}),
        );
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        let grid = store.grid_stats(StudentId::new(3), "Unit 1").await;

        assert_eq!(grid.grid_0, 5);
        assert_eq!(grid.total(), 8);
    }

    #[tokio::test]
    async fn batch_save_posts_every_row() {
        let h = harness();
        h.transport.ok(Method::Post, "/api/progress/batch-update", json!({"updated": 8}));
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        let progress = StudentProgress::start(StudentId::new(3), "Unit 1", 8, 5, fixed_now()).unwrap();

        let count = store.batch_save_progress(&progress.to_records()).await.unwrap();

        assert_eq!(count, 8);
        let sent = h.transport.requests_to(Method::Post, "/api/progress/batch-update");
        let crate::api::Body::Json(body) = &sent[0].body else {
            panic!("expected a json body");
        };
        assert_eq!(body["updates"].as_array().map(Vec::len), Some(8));
        assert_eq!(store.batch_save_progress(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn complete_task_sends_numbers() {
        let h = harness();
        h.transport.ok(Method::Post, "/api/progress/complete-task", json!({"message": "ok"}));
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());

        store
            .complete_task(StudentId::new(3), "Unit 1", 2, TaskNumber::Task3)
            .await
            .unwrap();

        let sent = h.transport.requests_to(Method::Post, "/api/progress/complete-task");
        assert_eq!(
            sent[0].body,
            crate::api::Body::Json(json!({
                "student_id": 3,
                "word_set_name": "Unit 1",
                "group_number": 2,
                "task_number": 3
            }))
        );
    }

    #[tokio::test]
    async fn update_word_progress_rejects_unknown_index() {
        let h = harness();
        let store = ProgressStore::new(h.api.clone(), h.local.clone(), fixed_clock());
        let progress = StudentProgress::start(StudentId::new(3), "Unit 1", 8, 5, fixed_now()).unwrap();

        let err = store.update_word_progress(&progress, 99).await.unwrap_err();

        assert!(matches!(err, StoreError::Progress(ProgressError::UnknownWord(99))));
    }
}
