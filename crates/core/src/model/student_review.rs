use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::model::anti_forget::{AntiForgetError, ReviewWord};
use crate::model::ids::{ReviewId, StudentId, WordId};

/// Words a student passed on one learning day, kept for later revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentReview {
    pub id: ReviewId,
    pub student_id: StudentId,
    pub word_set_name: String,
    pub learn_date: NaiveDate,
    pub words: Vec<ReviewWord>,
    #[serde(with = "crate::time::serde_utc")]
    pub created_at: DateTime<Utc>,
}

impl StudentReview {
    /// Review id in the backend's `review_{student}_{word set}_{unix seconds}` form.
    #[must_use]
    pub fn make_id(student_id: StudentId, word_set_name: &str, at: DateTime<Utc>) -> ReviewId {
        ReviewId::new(format!("review_{student_id}_{word_set_name}_{}", at.timestamp()))
    }

    /// # Errors
    ///
    /// Returns `UnknownWord` when the word is not in the review.
    pub fn toggle_star(&mut self, word_id: WordId) -> Result<bool, AntiForgetError> {
        let word = self
            .words
            .iter_mut()
            .find(|w| w.id == word_id)
            .ok_or(AntiForgetError::UnknownWord(word_id))?;
        word.is_starred = !word.is_starred;
        Ok(word.is_starred)
    }
}

/// Body of a create-review call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStudentReview {
    pub student_id: StudentId,
    pub word_set_name: String,
    pub learn_date: NaiveDate,
    pub words: Vec<ReviewWord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WordsStats {
    /// Distinct words over every review.
    pub total_words: usize,
    /// Distinct words per word set, by name.
    pub per_word_set: BTreeMap<String, usize>,
}

/// Reviews of one student, newest learning day first.
#[must_use]
pub fn reviews_of(reviews: &[StudentReview], student_id: StudentId) -> Vec<StudentReview> {
    let mut out: Vec<StudentReview> = reviews
        .iter()
        .filter(|r| r.student_id == student_id)
        .cloned()
        .collect();
    out.sort_by(|a, b| b.learn_date.cmp(&a.learn_date));
    out
}

#[must_use]
pub fn words_stats(reviews: &[StudentReview], student_id: StudentId) -> WordsStats {
    let mut all: BTreeSet<WordId> = BTreeSet::new();
    let mut per_set: BTreeMap<String, BTreeSet<WordId>> = BTreeMap::new();

    for review in reviews.iter().filter(|r| r.student_id == student_id) {
        let set = per_set.entry(review.word_set_name.clone()).or_default();
        for word in &review.words {
            all.insert(word.id);
            set.insert(word.id);
        }
    }

    WordsStats {
        total_words: all.len(),
        per_word_set: per_set.into_iter().map(|(name, ids)| (name, ids.len())).collect(),
    }
}
