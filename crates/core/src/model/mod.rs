mod anti_forget;
mod ids;
mod progress;
mod schedule;
mod student;
mod student_review;
mod user;
mod word;

pub use ids::{
    AntiForgetSessionId, ParseIdError, ProgressId, ReviewId, ScheduleId, StudentId, UserId,
    WordId, WordSetId,
};

pub use anti_forget::{
    AntiForgetError, AntiForgetSession, DEFAULT_TOTAL_REVIEWS, ReviewCounter, ReviewStats,
    ReviewWord,
};
pub use progress::{
    GridStats, GroupProgress, ProgressError, ProgressRecord, ProgressUpsert, Stage,
    StudentProgress, Task3Eligibility, TaskNumber, WordProgress,
};
pub use schedule::{
    ClassType, CourseType, DateGroup, ExpandedStates, Schedule, group_upcoming,
    today_review_count,
};
pub use student::{DeductHoursReply, Student, StudentError};
pub use student_review::{NewStudentReview, StudentReview, WordsStats, reviews_of, words_stats};
pub use user::{Role, User};
pub use word::{GroupPlan, Word, WordSet};
