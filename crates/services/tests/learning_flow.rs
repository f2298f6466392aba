use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::{Value, json};
use services::api::{Body, Method};
use services::{
    AppContext, AppServices, AuthSession, ClientConfig, LearningFlowError, LearningFlowService, MemoryNotifier,
    StubTransport,
};
use storage::LocalDatabase;
use tutor_core::model::{ProgressError, Role, Stage, StudentId, TaskNumber, User, UserId};
use tutor_core::time::{fixed_clock, fixed_now};

const WORDS_PATH: &str = "/api/words/sets/Unit 1/words";

fn teacher() -> User {
    User {
        id: UserId::from("teacher-1"),
        username: "teacher".into(),
        role: Role::Teacher,
        display_name: "Teacher One".into(),
        email: None,
        created_at: fixed_now(),
        last_login_at: None,
        student_id: None,
    }
}

fn words_json(count: u64) -> Value {
    let words: Vec<Value> = (1..=count)
        .map(|i| json!({"id": i, "english": format!("word{i}"), "chinese": format!("词{i}"), "word_set_name": "Unit 1"}))
        .collect();
    Value::Array(words)
}

fn services() -> (AppServices, StubTransport, MemoryNotifier) {
    let transport = StubTransport::new();
    let notifier = MemoryNotifier::new();
    let context = Arc::new(AppContext::with_session(AuthSession {
        token: "token".into(),
        user: Some(teacher()),
    }));
    let config = ClientConfig::from_lookup(|_| None).unwrap();
    let services = AppServices::from_parts(
        config,
        fixed_clock(),
        context,
        Arc::new(transport.clone()),
        Arc::new(notifier.clone()),
        LocalDatabase::in_memory().with_clock(fixed_clock()),
    );
    (services, transport, notifier)
}

fn accept_progress_calls(transport: &StubTransport) {
    transport.ok(Method::Get, WORDS_PATH, words_json(7));
    transport.ok(Method::Get, "/api/progress/student/3", json!([]));
    transport.ok(Method::Post, "/api/progress/complete-task", json!({"message": "ok"}));
}

#[tokio::test]
async fn groups_unlock_in_order() {
    let (services, transport, _) = services();
    accept_progress_calls(&transport);
    let flow = services.learning_flow();

    let mut session = flow.start(StudentId::new(3), "Unit 1").await.unwrap();
    assert_eq!(session.progress.total_groups(), 2);
    assert_eq!(LearningFlowService::group_words(&session, 1).unwrap().len(), 5);
    assert_eq!(LearningFlowService::group_words(&session, 2).unwrap().len(), 2);
    assert!(matches!(
        LearningFlowService::group_words(&session, 3),
        Err(LearningFlowError::Progress(ProgressError::UnknownGroup(3)))
    ));

    let locked = flow.complete_task(&mut session, 1, TaskNumber::Task3).await;
    assert!(matches!(
        locked,
        Err(LearningFlowError::Progress(ProgressError::TaskLocked { group: 1, .. }))
    ));
    assert!(transport.requests_to(Method::Post, "/api/progress/complete-task").is_empty());

    for task in TaskNumber::ALL {
        flow.complete_task(&mut session, 1, task).await.unwrap();
    }

    assert_eq!(session.progress.current_group(), 2);
    assert!(!session.progress.is_complete());
    let sent = transport.requests_to(Method::Post, "/api/progress/complete-task");
    assert_eq!(sent.len(), 3);
    assert_eq!(
        sent[2].body,
        Body::Json(json!({
            "student_id": 3,
            "word_set_name": "Unit 1",
            "group_number": 1,
            "task_number": 3
        }))
    );
}

#[tokio::test]
async fn refused_task_leaves_session_untouched() {
    let (services, transport, notifier) = services();
    accept_progress_calls(&transport);
    transport.respond(Method::Post, "/api/progress/complete-task", 500, json!({"detail": "db down"}));
    let flow = services.learning_flow();
    let mut session = flow.start(StudentId::new(3), "Unit 1").await.unwrap();
    let before = session.clone();

    let err = flow.complete_task(&mut session, 1, TaskNumber::Task1).await.unwrap_err();

    assert_eq!(err.to_string(), "db down");
    assert_eq!(session, before);
    assert_eq!(notifier.take().len(), 1);
}

#[tokio::test]
async fn mixed_test_covers_every_unlocked_group() {
    let (services, transport, _) = services();
    accept_progress_calls(&transport);
    let session = services
        .learning_flow()
        .start(StudentId::new(3), "Unit 1")
        .await
        .unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut picked: Vec<u64> = LearningFlowService::mixed_test_words_with(&session, 2, &mut rng)
        .unwrap()
        .iter()
        .map(|w| w.id.value())
        .collect();
    picked.sort_unstable();

    assert_eq!(picked, (1..=7).collect::<Vec<u64>>());
    assert_eq!(LearningFlowService::mixed_test_words(&session, 1).unwrap().len(), 5);
}

#[tokio::test]
async fn empty_word_set_cannot_start() {
    let (services, transport, _) = services();
    transport.ok(Method::Get, WORDS_PATH, json!([]));

    let err = services
        .learning_flow()
        .start(StudentId::new(3), "Unit 1")
        .await
        .unwrap_err();

    assert!(matches!(err, LearningFlowError::EmptyWordSet(name) if name == "Unit 1"));
}

#[tokio::test]
async fn post_learning_test_feeds_reviews_and_anti_forget() {
    let (services, transport, _) = services();
    accept_progress_calls(&transport);
    transport.ok(Method::Post, "/api/progress/batch-update", json!({"updated": 7}));
    transport.ok(
        Method::Post,
        "/api/student-reviews/",
        json!({
            "id": "review_3_Unit 1_1700000000",
            "student_id": 3,
            "word_set_name": "Unit 1",
            "learn_date": "2023-11-14",
            "words": [
                {"id": 1, "english": "word1", "chinese": "词1"},
                {"id": 6, "english": "word6", "chinese": "词6"}
            ],
            "created_at": "2023-11-14T22:13:20Z"
        }),
    );
    transport.ok(
        Method::Post,
        "/api/anti-forget/sessions",
        json!({
            "id": "af_3_Unit 1_1700000000",
            "student_id": 3,
            "teacher_id": "teacher-1",
            "word_set_name": "Unit 1",
            "words": [
                {"id": 1, "english": "word1", "chinese": "词1"},
                {"id": 6, "english": "word6", "chinese": "词6"}
            ],
            "review_count": 0,
            "total_reviews": 10,
            "created_at": "2023-11-14T22:13:20Z"
        }),
    );
    let flow = services.learning_flow();
    let mut session = flow.start(StudentId::new(3), "Unit 1").await.unwrap();
    session.progress.set_word_stage(1, 3, fixed_now()).unwrap();

    let outcome = flow
        .finish_post_learning_test(&mut session, &[(0, true), (1, false), (2, false), (5, true)])
        .await
        .unwrap();

    assert_eq!(outcome.passed.len(), 2);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.saved_rows, 7);
    assert_eq!(session.progress.word_stage(0), Some(Stage::clamped(1)));
    assert_eq!(session.progress.word_stage(1), Some(Stage::clamped(1)));
    assert_eq!(session.progress.word_stage(2), Some(Stage::UNSEEN));
    assert_eq!(session.progress.word_stage(5), Some(Stage::clamped(1)));

    let review = transport.requests_to(Method::Post, "/api/student-reviews/");
    let Body::Json(body) = &review[0].body else {
        panic!("expected a json body");
    };
    assert_eq!(body["learn_date"], json!("2023-11-14"));
    assert_eq!(body["words"].as_array().map(Vec::len), Some(2));

    let anti_forget = outcome.anti_forget.unwrap();
    assert_eq!(anti_forget.teacher_id.as_str(), "teacher-1");
    assert!(
        services
            .anti_forget()
            .active_session(StudentId::new(3), "Unit 1", &UserId::from("teacher-1"))
            .is_some()
    );
}

#[tokio::test]
async fn nothing_passed_records_nothing() {
    let (services, transport, _) = services();
    accept_progress_calls(&transport);
    transport.ok(Method::Post, "/api/progress/batch-update", json!({}));
    let flow = services.learning_flow();
    let mut session = flow.start(StudentId::new(3), "Unit 1").await.unwrap();

    let outcome = flow
        .finish_post_learning_test(&mut session, &[(0, false)])
        .await
        .unwrap();

    assert!(outcome.review.is_none());
    assert!(outcome.anti_forget.is_none());
    assert!(transport.requests_to(Method::Post, "/api/student-reviews/").is_empty());
}

#[tokio::test]
async fn bad_index_saves_nothing() {
    let (services, transport, _) = services();
    accept_progress_calls(&transport);
    let flow = services.learning_flow();
    let mut session = flow.start(StudentId::new(3), "Unit 1").await.unwrap();

    let err = flow
        .finish_post_learning_test(&mut session, &[(0, true), (42, true)])
        .await
        .unwrap_err();

    assert!(matches!(err, LearningFlowError::Progress(ProgressError::UnknownWord(42))));
    assert!(transport.requests_to(Method::Post, "/api/progress/batch-update").is_empty());
    assert_eq!(session.progress.word_stage(0), Some(Stage::UNSEEN));
}

#[tokio::test]
async fn repeated_word_saves_nothing() {
    let (services, transport, _) = services();
    accept_progress_calls(&transport);
    let flow = services.learning_flow();
    let mut session = flow.start(StudentId::new(3), "Unit 1").await.unwrap();

    let err = flow
        .finish_post_learning_test(&mut session, &[(0, true), (0, true)])
        .await
        .unwrap_err();

    assert!(matches!(err, LearningFlowError::Progress(ProgressError::DuplicateWord(0))));
    assert!(transport.requests_to(Method::Post, "/api/progress/batch-update").is_empty());
    assert!(transport.requests_to(Method::Post, "/api/student-reviews/").is_empty());
    assert_eq!(session.progress.word_stage(0), Some(Stage::UNSEEN));
}
