use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use tracing::{info, warn};
use tutor_core::model::{NewStudentReview, ReviewId, StudentId, StudentReview, WordId, WordsStats, reviews_of, words_stats};

use crate::api::{ApiClient, ApiRequest};
use crate::error::StoreError;
use crate::stores::lock;

#[derive(Debug, Deserialize)]
struct StarReply {
    is_starred: bool,
}

/// Per-day lists of passed words, kept on the backend and mirrored in memory.
pub struct StudentReviewStore {
    api: ApiClient,
    reviews: Mutex<BTreeMap<ReviewId, StudentReview>>,
}

impl StudentReviewStore {
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        Self {
            api,
            reviews: Mutex::new(BTreeMap::new()),
        }
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn create_review(&self, review: &NewStudentReview) -> Result<StudentReview, StoreError> {
        // The collection route only answers with its trailing slash.
        let created: StudentReview = self.api.post_json(&["api", "student-reviews", ""], review).await?;
        info!(review = %created.id, words = created.words.len(), "student review recorded");
        lock(&self.reviews).insert(created.id.clone(), created.clone());
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails.
    pub async fn fetch_student_reviews(&self, student_id: StudentId) -> Result<Vec<StudentReview>, StoreError> {
        let key = student_id.to_string();
        let fetched: Vec<StudentReview> = self
            .api
            .get(&["api", "student-reviews", "student", key.as_str()])
            .await?;
        let mut mirror = lock(&self.reviews);
        mirror.retain(|_, r| r.student_id != student_id);
        for review in &fetched {
            mirror.insert(review.id.clone(), review.clone());
        }
        Ok(reviews_of(&fetched, student_id))
    }

    /// Mirrored reviews of a student, newest learning day first.
    #[must_use]
    pub fn student_reviews(&self, student_id: StudentId) -> Vec<StudentReview> {
        let all: Vec<StudentReview> = lock(&self.reviews).values().cloned().collect();
        reviews_of(&all, student_id)
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails.
    pub async fn fetch_review(&self, id: &ReviewId) -> Result<StudentReview, StoreError> {
        let review: StudentReview = self.api.get(&["api", "student-reviews", id.as_str()]).await?;
        lock(&self.reviews).insert(review.id.clone(), review.clone());
        Ok(review)
    }

    #[must_use]
    pub fn get_review(&self, id: &ReviewId) -> Option<StudentReview> {
        lock(&self.reviews).get(id).cloned()
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn toggle_word_star(&self, id: &ReviewId, word_id: WordId) -> Result<bool, StoreError> {
        let word = word_id.to_string();
        let reply: StarReply = self
            .api
            .call(ApiRequest::post(&[
                "api",
                "student-reviews",
                id.as_str(),
                "toggle-star",
                word.as_str(),
            ]))
            .await?;

        if let Some(review) = lock(&self.reviews).get_mut(id) {
            match review.words.iter_mut().find(|w| w.id == word_id) {
                Some(w) => w.is_starred = reply.is_starred,
                None => warn!(review = %id, word = %word_id, "star toggled for a word the mirror does not know"),
            }
        }
        Ok(reply.is_starred)
    }

    /// Distinct words over the student's mirrored reviews.
    #[must_use]
    pub fn student_words_stats(&self, student_id: StudentId) -> WordsStats {
        let all: Vec<StudentReview> = lock(&self.reviews).values().cloned().collect();
        words_stats(&all, student_id)
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the backend refuses.
    pub async fn delete_review(&self, id: &ReviewId) -> Result<(), StoreError> {
        self.api.delete(&["api", "student-reviews", id.as_str()]).await?;
        lock(&self.reviews).remove(id);
        Ok(())
    }
}
