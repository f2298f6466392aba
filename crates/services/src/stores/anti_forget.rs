use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use tutor_core::model::{
    AntiForgetSession, AntiForgetSessionId, ReviewCounter, ReviewStats, ReviewWord, StudentId, UserId, WordId,
};

use crate::api::{ApiClient, ApiRequest};
use crate::error::StoreError;
use crate::stores::lock;

#[derive(Debug, Deserialize)]
struct StarReply {
    is_starred: bool,
}

/// Anti-forget review sessions, kept on the backend and mirrored in memory.
pub struct AntiForgetStore {
    api: ApiClient,
    sessions: Mutex<BTreeMap<AntiForgetSessionId, AntiForgetSession>>,
}

impl AntiForgetStore {
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Starts a session over `words`, all unstarred.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn create_session(
        &self,
        student_id: StudentId,
        word_set_name: &str,
        teacher_id: &UserId,
        words: Vec<ReviewWord>,
    ) -> Result<AntiForgetSession, StoreError> {
        let words: Vec<ReviewWord> = words
            .into_iter()
            .map(|w| ReviewWord { is_starred: false, ..w })
            .collect();
        let body = json!({
            "student_id": student_id,
            "word_set_name": word_set_name,
            "teacher_id": teacher_id,
            "words": words,
        });
        let session: AntiForgetSession = self
            .api
            .post_json(&["api", "anti-forget", "sessions"], &body)
            .await?;
        info!(session = %session.id, words = session.words.len(), "anti-forget session created");
        self.remember(session.clone());
        Ok(session)
    }

    fn remember(&self, session: AntiForgetSession) {
        lock(&self.sessions).insert(session.id.clone(), session);
    }

    /// Every session of a student; replaces the student's part of the mirror.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails.
    pub async fn fetch_student_sessions(&self, student_id: StudentId) -> Result<Vec<AntiForgetSession>, StoreError> {
        let key = student_id.to_string();
        let sessions: Vec<AntiForgetSession> = self
            .api
            .get(&["api", "anti-forget", "sessions", "student", key.as_str()])
            .await?;
        let mut mirror = lock(&self.sessions);
        mirror.retain(|_, s| s.student_id != student_id);
        for session in &sessions {
            mirror.insert(session.id.clone(), session.clone());
        }
        Ok(sessions)
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails.
    pub async fn fetch_session(&self, id: &AntiForgetSessionId) -> Result<AntiForgetSession, StoreError> {
        let session: AntiForgetSession = self
            .api
            .get(&["api", "anti-forget", "sessions", id.as_str()])
            .await?;
        self.remember(session.clone());
        Ok(session)
    }

    /// Mirrored session, if fetched before.
    #[must_use]
    pub fn get_session(&self, id: &AntiForgetSessionId) -> Option<AntiForgetSession> {
        lock(&self.sessions).get(id).cloned()
    }

    #[must_use]
    pub fn student_sessions(&self, student_id: StudentId) -> Vec<AntiForgetSession> {
        lock(&self.sessions)
            .values()
            .filter(|s| s.student_id == student_id)
            .cloned()
            .collect()
    }

    /// The unfinished mirrored session for this student, word set and teacher.
    #[must_use]
    pub fn active_session(
        &self,
        student_id: StudentId,
        word_set_name: &str,
        teacher_id: &UserId,
    ) -> Option<AntiForgetSession> {
        lock(&self.sessions)
            .values()
            .find(|s| s.is_active_for(student_id, word_set_name, teacher_id))
            .cloned()
    }

    /// Flips a word's star on the backend and returns the new flag.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn toggle_word_star(&self, id: &AntiForgetSessionId, word_id: WordId) -> Result<bool, StoreError> {
        let word = word_id.to_string();
        let reply: StarReply = self
            .api
            .call(ApiRequest::post(&[
                "api",
                "anti-forget",
                "sessions",
                id.as_str(),
                "toggle-star",
                word.as_str(),
            ]))
            .await?;

        if let Some(session) = lock(&self.sessions).get_mut(id)
            && let Err(err) = session.set_star(word_id, reply.is_starred)
        {
            warn!(session = %id, error = %err, "star toggled for a word the mirror does not know");
        }
        Ok(reply.is_starred)
    }

    /// Counts one finished review. The mirrored count never goes backwards.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn complete_review(&self, id: &AntiForgetSessionId) -> Result<ReviewCounter, StoreError> {
        let counter: ReviewCounter = self
            .api
            .call(ApiRequest::post(&[
                "api",
                "anti-forget",
                "sessions",
                id.as_str(),
                "complete-review",
            ]))
            .await?;
        if let Some(session) = lock(&self.sessions).get_mut(id) {
            session.sync_counter(counter);
        }
        info!(
            session = %id,
            current = counter.current,
            remaining = counter.total.saturating_sub(counter.current),
            "review completed"
        );
        Ok(counter)
    }

    /// Review statistics from the backend, recomputed locally when the
    /// backend cannot answer but the session is mirrored.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when both sources fail.
    pub async fn review_stats(&self, id: &AntiForgetSessionId) -> Result<ReviewStats, StoreError> {
        let result: Result<ReviewStats, _> = self
            .api
            .get(&["api", "anti-forget", "sessions", id.as_str(), "stats"])
            .await;
        match result {
            Ok(mut stats) => {
                stats.remaining_reviews = stats.total_reviews.saturating_sub(stats.current_review);
                Ok(stats)
            }
            Err(err) => self.get_session(id).map(|s| s.stats()).ok_or_else(|| err.into()),
        }
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn delete_session(&self, id: &AntiForgetSessionId) -> Result<(), StoreError> {
        self.api
            .delete(&["api", "anti-forget", "sessions", id.as_str()])
            .await?;
        lock(&self.sessions).remove(id);
        Ok(())
    }

    /// Deletes the student's mirrored sessions whose reviews are all done.
    /// Returns how many were deleted; failures are logged and skipped.
    pub async fn cleanup_completed_sessions(&self, student_id: StudentId) -> usize {
        let done: Vec<AntiForgetSessionId> = lock(&self.sessions)
            .values()
            .filter(|s| s.student_id == student_id && s.is_completed())
            .map(|s| s.id.clone())
            .collect();

        let mut deleted = 0;
        for id in done {
            match self.delete_session(&id).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!(session = %id, error = %err, "could not delete completed session"),
            }
        }
        deleted
    }
}
