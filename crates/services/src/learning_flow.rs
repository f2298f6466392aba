use std::sync::Arc;

use rand::Rng;
use rand::rng;
use rand::seq::SliceRandom;
use tracing::info;
use tutor_core::Clock;
use tutor_core::model::{
    AntiForgetSession, NewStudentReview, ProgressError, ReviewWord, StudentId, StudentProgress, StudentReview,
    Task3Eligibility, TaskNumber, Word,
};

use crate::context::AppContext;
use crate::error::{LearningFlowError, StoreError};
use crate::stores::{AntiForgetStore, ProgressStore, StudentReviewStore, WordStore};

/// One student working through one word set.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningSession {
    pub progress: StudentProgress,
    /// Words in index order; `words[i]` is word index `i`.
    pub words: Vec<Word>,
}

impl LearningSession {
    #[must_use]
    pub fn student_id(&self) -> StudentId {
        self.progress.student_id()
    }

    #[must_use]
    pub fn word_set_name(&self) -> &str {
        self.progress.word_set_name()
    }
}

/// What a post-learning test changed.
#[derive(Debug, Clone, PartialEq)]
pub struct PostTestOutcome {
    pub passed: Vec<ReviewWord>,
    pub failed: usize,
    /// Progress rows written in the batch save.
    pub saved_rows: usize,
    /// Set when at least one word passed.
    pub review: Option<StudentReview>,
    pub anti_forget: Option<AntiForgetSession>,
}

/// Drives the learn, quiz and mixed-test cycle of each group, then the
/// post-learning test that feeds reviews and anti-forget sessions.
pub struct LearningFlowService {
    words: Arc<WordStore>,
    progress: Arc<ProgressStore>,
    reviews: Arc<StudentReviewStore>,
    anti_forget: Arc<AntiForgetStore>,
    context: Arc<AppContext>,
    clock: Clock,
    group_size: usize,
    eligibility: Task3Eligibility,
}

impl LearningFlowService {
    #[must_use]
    pub fn new(
        words: Arc<WordStore>,
        progress: Arc<ProgressStore>,
        reviews: Arc<StudentReviewStore>,
        anti_forget: Arc<AntiForgetStore>,
        context: Arc<AppContext>,
        clock: Clock,
    ) -> Self {
        Self {
            words,
            progress,
            reviews,
            anti_forget,
            context,
            clock,
            group_size: crate::config::DEFAULT_GROUP_SIZE,
            eligibility: Task3Eligibility::default(),
        }
    }

    #[must_use]
    pub fn with_group_size(mut self, group_size: usize) -> Self {
        self.group_size = group_size;
        self
    }

    #[must_use]
    pub fn with_eligibility(mut self, eligibility: Task3Eligibility) -> Self {
        self.eligibility = eligibility;
        self
    }

    /// Loads the word set and the student's stored progress on it.
    ///
    /// # Errors
    ///
    /// Returns `EmptyWordSet` when the set has no words, or the store error
    /// of the failing fetch.
    pub async fn start(&self, student_id: StudentId, word_set_name: &str) -> Result<LearningSession, LearningFlowError> {
        let words = self.words.fetch_words(word_set_name).await?;
        if words.is_empty() {
            return Err(LearningFlowError::EmptyWordSet(word_set_name.to_owned()));
        }
        let progress = self
            .progress
            .load_progress(student_id, word_set_name, words.len(), self.group_size, self.eligibility)
            .await?;
        info!(
            student = %student_id,
            word_set = word_set_name,
            groups = progress.total_groups(),
            current_group = progress.current_group(),
            "learning session started"
        );
        Ok(LearningSession { progress, words })
    }

    /// Words of one group, for new-word learning and the group quiz.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` for a group outside the plan.
    pub fn group_words(session: &LearningSession, group: u32) -> Result<Vec<Word>, LearningFlowError> {
        let words = session
            .progress
            .plan()
            .words_in_group(group)
            .and_then(|range| session.words.get(range))
            .ok_or(ProgressError::UnknownGroup(group))?;
        Ok(words.to_vec())
    }

    /// Every word of groups `1..=group`, shuffled, for the mixed test.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` for a group outside the plan.
    pub fn mixed_test_words(session: &LearningSession, group: u32) -> Result<Vec<Word>, LearningFlowError> {
        Self::mixed_test_words_with(session, group, &mut rng())
    }

    /// [`LearningFlowService::mixed_test_words`] with a caller-chosen RNG.
    ///
    /// # Errors
    ///
    /// Returns `UnknownGroup` for a group outside the plan.
    pub fn mixed_test_words_with<R: Rng + ?Sized>(
        session: &LearningSession,
        group: u32,
        rng: &mut R,
    ) -> Result<Vec<Word>, LearningFlowError> {
        let picked = session
            .progress
            .plan()
            .words_through_group(group)
            .and_then(|range| session.words.get(range))
            .ok_or(ProgressError::UnknownGroup(group))?;
        let mut words = picked.to_vec();
        words.shuffle(rng);
        Ok(words)
    }

    /// Marks a task done once the state machine allows it and the backend
    /// has accepted it. The session is untouched on error.
    ///
    /// # Errors
    ///
    /// Returns `Progress` when the task is locked or the group unknown, and
    /// `Store` when the backend refuses.
    pub async fn complete_task(
        &self,
        session: &mut LearningSession,
        group: u32,
        task: TaskNumber,
    ) -> Result<(), LearningFlowError> {
        let mut next = session.progress.clone();
        next.complete_task(group, task, self.clock.now())?;
        self.progress
            .complete_task(session.student_id(), session.word_set_name(), group, task)
            .await?;
        session.progress = next;
        info!(
            student = %session.student_id(),
            word_set = session.word_set_name(),
            group,
            task = task.number(),
            "task completed"
        );
        Ok(())
    }

    /// Applies post-learning test results and records what was passed.
    ///
    /// Stages move by the pass/fail rule and are saved in one batch. Passed
    /// words become today's student review and a new anti-forget session
    /// owned by the signed-in teacher.
    ///
    /// # Errors
    ///
    /// Returns `Progress` for a word index outside the set or tested twice
    /// (nothing is saved), `Store(NotLoggedIn)` without a signed-in user,
    /// and `Store` when a backend call fails.
    pub async fn finish_post_learning_test(
        &self,
        session: &mut LearningSession,
        results: &[(usize, bool)],
    ) -> Result<PostTestOutcome, LearningFlowError> {
        let teacher_id = self.context.current_user_id().ok_or(StoreError::NotLoggedIn)?;
        let mut next = session.progress.clone();
        next.apply_test_results(results, self.clock.now())?;

        let saved_rows = self.progress.batch_save_progress(&next.to_records()).await?;
        session.progress = next;

        let passed: Vec<ReviewWord> = results
            .iter()
            .filter(|(_, ok)| *ok)
            .filter_map(|(idx, _)| session.words.get(*idx))
            .map(|w| ReviewWord {
                id: w.id,
                english: w.english.clone(),
                chinese: w.chinese.clone(),
                is_starred: false,
            })
            .collect();
        let failed = results.len() - passed.len();

        let (review, anti_forget) = if passed.is_empty() {
            (None, None)
        } else {
            let review = self
                .reviews
                .create_review(&NewStudentReview {
                    student_id: session.student_id(),
                    word_set_name: session.word_set_name().to_owned(),
                    learn_date: self.clock.today(),
                    words: passed.clone(),
                })
                .await?;
            let anti_forget = self
                .anti_forget
                .create_session(session.student_id(), session.word_set_name(), &teacher_id, passed.clone())
                .await?;
            (Some(review), Some(anti_forget))
        };

        info!(
            student = %session.student_id(),
            word_set = session.word_set_name(),
            passed = passed.len(),
            failed,
            "post-learning test finished"
        );
        Ok(PostTestOutcome {
            passed,
            failed,
            saved_rows,
            review,
            anti_forget,
        })
    }
}
