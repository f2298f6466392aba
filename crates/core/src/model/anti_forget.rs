use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{AntiForgetSessionId, StudentId, UserId, WordId};

/// Reviews needed before an anti-forget session counts as done.
pub const DEFAULT_TOTAL_REVIEWS: u32 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AntiForgetError {
    #[error("word {0} is not part of this session")]
    UnknownWord(WordId),
}

/// A passed word carried into spaced review, with its star flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewWord {
    pub id: WordId,
    pub english: String,
    pub chinese: String,
    #[serde(default)]
    pub is_starred: bool,
}

/// Counter state after a completed review, as the backend reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewCounter {
    #[serde(rename = "current_count")]
    pub current: u32,
    #[serde(rename = "total_count")]
    pub total: u32,
    pub is_completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewStats {
    pub current_review: u32,
    pub total_reviews: u32,
    #[serde(default)]
    pub remaining_reviews: u32,
    pub starred_words: usize,
    pub total_words: usize,
    /// Whole percent of reviews done, rounded down.
    #[serde(rename = "progress")]
    pub progress_percent: u32,
}

/// Bounded review counter over a set of learned words.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntiForgetSession {
    pub id: AntiForgetSessionId,
    pub student_id: StudentId,
    pub teacher_id: UserId,
    pub word_set_name: String,
    pub words: Vec<ReviewWord>,
    review_count: u32,
    total_reviews: u32,
    #[serde(with = "crate::time::serde_utc")]
    pub created_at: DateTime<Utc>,
}

impl AntiForgetSession {
    /// Session id in the backend's `af_{student}_{word set}_{unix seconds}` form.
    #[must_use]
    pub fn make_id(student_id: StudentId, word_set_name: &str, at: DateTime<Utc>) -> AntiForgetSessionId {
        AntiForgetSessionId::new(format!("af_{student_id}_{word_set_name}_{}", at.timestamp()))
    }

    #[must_use]
    pub fn new(
        student_id: StudentId,
        teacher_id: UserId,
        word_set_name: impl Into<String>,
        words: Vec<ReviewWord>,
        at: DateTime<Utc>,
    ) -> Self {
        let word_set_name = word_set_name.into();
        Self {
            id: Self::make_id(student_id, &word_set_name, at),
            student_id,
            teacher_id,
            word_set_name,
            words,
            review_count: 0,
            total_reviews: DEFAULT_TOTAL_REVIEWS,
            created_at: at,
        }
    }

    #[must_use]
    pub fn review_count(&self) -> u32 {
        self.review_count
    }

    #[must_use]
    pub fn total_reviews(&self) -> u32 {
        self.total_reviews
    }

    /// Overrides the count locally once the backend has answered.
    ///
    /// The count only moves forward; lower values are ignored.
    pub fn sync_counter(&mut self, counter: ReviewCounter) {
        self.total_reviews = counter.total;
        self.review_count = self.review_count.max(counter.current);
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.review_count >= self.total_reviews
    }

    /// Records one finished review. A completed session stays at its total.
    pub fn complete_review(&mut self) -> ReviewCounter {
        if !self.is_completed() {
            self.review_count += 1;
        }
        self.counter()
    }

    #[must_use]
    pub fn counter(&self) -> ReviewCounter {
        ReviewCounter {
            current: self.review_count,
            total: self.total_reviews,
            is_completed: self.is_completed(),
        }
    }

    /// Flips the star on one word and returns the new flag.
    ///
    /// # Errors
    ///
    /// Returns `UnknownWord` when the word is not in the session.
    pub fn toggle_star(&mut self, word_id: WordId) -> Result<bool, AntiForgetError> {
        let word = self
            .words
            .iter_mut()
            .find(|w| w.id == word_id)
            .ok_or(AntiForgetError::UnknownWord(word_id))?;
        word.is_starred = !word.is_starred;
        Ok(word.is_starred)
    }

    /// Sets the star on one word to a known value.
    ///
    /// # Errors
    ///
    /// Returns `UnknownWord` when the word is not in the session.
    pub fn set_star(&mut self, word_id: WordId, starred: bool) -> Result<(), AntiForgetError> {
        let word = self
            .words
            .iter_mut()
            .find(|w| w.id == word_id)
            .ok_or(AntiForgetError::UnknownWord(word_id))?;
        word.is_starred = starred;
        Ok(())
    }

    #[must_use]
    pub fn starred_words(&self) -> usize {
        self.words.iter().filter(|w| w.is_starred).count()
    }

    #[must_use]
    pub fn stats(&self) -> ReviewStats {
        let progress_percent = if self.total_reviews == 0 {
            100
        } else {
            let pct = u64::from(self.review_count) * 100 / u64::from(self.total_reviews);
            u32::try_from(pct).unwrap_or(u32::MAX)
        };
        ReviewStats {
            current_review: self.review_count,
            total_reviews: self.total_reviews,
            remaining_reviews: self.total_reviews.saturating_sub(self.review_count),
            starred_words: self.starred_words(),
            total_words: self.words.len(),
            progress_percent,
        }
    }

    /// An unfinished session for this student, word set and teacher.
    #[must_use]
    pub fn is_active_for(&self, student_id: StudentId, word_set_name: &str, teacher_id: &UserId) -> bool {
        self.student_id == student_id
            && self.word_set_name == word_set_name
            && &self.teacher_id == teacher_id
            && !self.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn words() -> Vec<ReviewWord> {
        (1..=3)
            .map(|i| ReviewWord {
                id: WordId::new(i),
                english: format!("word{i}"),
                chinese: format!("词{i}"),
                is_starred: false,
            })
            .collect()
    }

    fn session() -> AntiForgetSession {
        AntiForgetSession::new(StudentId::new(3), UserId::from("teacher-1"), "Unit 1", words(), fixed_now())
    }

    #[test]
    fn id_follows_backend_format() {
        assert_eq!(session().id.as_str(), "af_3_Unit 1_1700000000");
    }

    #[test]
    fn completes_after_total_reviews() {
        let mut s = session();
        for i in 1..DEFAULT_TOTAL_REVIEWS {
            let counter = s.complete_review();
            assert_eq!(counter.current, i);
            assert!(!counter.is_completed);
        }
        let last = s.complete_review();
        assert!(last.is_completed);
        assert!(s.is_completed());
    }

    #[test]
    fn counter_never_decreases_or_overshoots() {
        let mut s = session();
        let mut previous = 0;
        for _ in 0..15 {
            let counter = s.complete_review();
            assert!(counter.current >= previous);
            previous = counter.current;
        }
        assert_eq!(s.review_count(), DEFAULT_TOTAL_REVIEWS);

        s.sync_counter(ReviewCounter {
            current: 2,
            total: DEFAULT_TOTAL_REVIEWS,
            is_completed: false,
        });
        assert_eq!(s.review_count(), DEFAULT_TOTAL_REVIEWS);
    }

    #[test]
    fn starring_leaves_counter_alone() {
        let mut s = session();
        s.complete_review();
        assert!(s.toggle_star(WordId::new(2)).unwrap());
        assert!(!s.toggle_star(WordId::new(2)).unwrap());
        assert!(s.toggle_star(WordId::new(1)).unwrap());
        assert_eq!(s.review_count(), 1);
        assert_eq!(
            s.toggle_star(WordId::new(9)),
            Err(AntiForgetError::UnknownWord(WordId::new(9)))
        );
    }

    #[test]
    fn stats_round_percent_down() {
        let mut s = session();
        s.complete_review();
        s.toggle_star(WordId::new(3)).unwrap();
        let stats = s.stats();
        assert_eq!(stats.progress_percent, 10);
        assert_eq!(stats.remaining_reviews, 9);
        assert_eq!(stats.starred_words, 1);
        assert_eq!(stats.total_words, 3);
    }

    #[test]
    fn active_only_while_unfinished() {
        let mut s = session();
        let teacher = UserId::from("teacher-1");
        assert!(s.is_active_for(StudentId::new(3), "Unit 1", &teacher));
        assert!(!s.is_active_for(StudentId::new(3), "Unit 2", &teacher));
        for _ in 0..DEFAULT_TOTAL_REVIEWS {
            s.complete_review();
        }
        assert!(!s.is_active_for(StudentId::new(3), "Unit 1", &teacher));
    }

    #[test]
    fn reads_backend_session() {
        let json = r#"{"id":"af_3_Unit 1_1700000000","student_id":3,"word_set_name":"Unit 1",
            "teacher_id":"teacher-1","words":[{"id":1,"english":"apple","chinese":"苹果"}],
            "review_count":4,"total_reviews":10,"created_at":"2025-01-14T08:00:00"}"#;
        let s: AntiForgetSession = serde_json::from_str(json).unwrap();
        assert_eq!(s.review_count(), 4);
        assert!(!s.words[0].is_starred);
    }
}
