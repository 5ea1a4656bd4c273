// tests/postgres_store_tests.rs

//! Store-level checks against a real Postgres. Skipped when DATABASE_URL is
//! not set.

use std::sync::Arc;

use chrono::{Duration, Utc};
use exam_proctor::{
    error::AppError,
    models::{
        exam::{Exam, ExamSettings, ProctoringSettings, Question},
        session::{SessionStatus, SubmitReason},
        violation::LogViolationRequest,
    },
    proctoring::session,
    store::{DeleteOutcome, Store, postgres::PgStore},
};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

async fn pg_store() -> Option<Arc<dyn Store>> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres store test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    Some(Arc::new(PgStore::new(pool)))
}

/// Inserts an open exam with one allowed student.
async fn seed_exam(store: &dyn Store, threshold: u32) -> (Exam, Uuid) {
    let student = Uuid::new_v4();
    let now = Utc::now();
    let exam = Exam {
        id: Uuid::new_v4(),
        title: "Compilers".into(),
        description: String::new(),
        course: "CS440".into(),
        created_by: Uuid::new_v4(),
        duration: 60,
        total_marks: 2,
        passing_marks: 1,
        questions: (0..2)
            .map(|i| Question {
                id: Uuid::new_v4(),
                question_text: format!("Q{}", i + 1),
                options: vec!["A".into(), "B".into(), "C".into()],
                correct_answer: 2,
                marks: 1,
                explanation: None,
                image: None,
            })
            .collect(),
        scheduled_at: now - Duration::minutes(5),
        end_at: now + Duration::hours(1),
        allowed_students: vec![student],
        proctoring_settings: ProctoringSettings {
            warning_threshold: threshold,
            ..ProctoringSettings::default()
        },
        settings: ExamSettings::default(),
        is_active: true,
        created_at: now,
    };
    let exam = store.insert_exam(exam).await.unwrap();
    (exam, student)
}

fn tab_switch() -> LogViolationRequest {
    serde_json::from_value(serde_json::json!({ "violationType": "tab-switch" })).unwrap()
}

#[tokio::test]
async fn concurrent_starts_create_one_row() {
    let Some(store) = pg_store().await else { return };
    let (exam, student) = seed_exam(store.as_ref(), 3).await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            session::start_session(store.as_ref(), exam.id, student, Utc::now()).await
        }));
    }

    let mut ids = Vec::new();
    let mut created = 0;
    for task in tasks {
        let started = task.await.unwrap().unwrap();
        if !started.resumed {
            created += 1;
        }
        ids.push(started.session.id);
    }

    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.list_sessions_for_exam(exam.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn stale_version_update_is_refused() {
    let Some(store) = pg_store().await else { return };
    let (exam, student) = seed_exam(store.as_ref(), 3).await;
    let started = session::start_session(store.as_ref(), exam.id, student, Utc::now())
        .await
        .unwrap();

    let mut first = started.session.clone();
    first.time_spent = 10;
    let stored = store.update_session_if_current(&first).await.unwrap().unwrap();
    assert_eq!(stored.version, started.session.version + 1);

    let mut stale = started.session;
    stale.time_spent = 20;
    assert!(store.update_session_if_current(&stale).await.unwrap().is_none());

    let reloaded = store.get_session(stored.id).await.unwrap().unwrap();
    assert_eq!(reloaded.time_spent, 10);
}

#[tokio::test]
async fn violation_on_terminal_session_is_refused() {
    let Some(store) = pg_store().await else { return };
    let (exam, student) = seed_exam(store.as_ref(), 3).await;
    let started = session::start_session(store.as_ref(), exam.id, student, Utc::now())
        .await
        .unwrap();
    let session_id = started.session.id;

    session::log_violation(store.as_ref(), session_id, student, tab_switch(), Utc::now())
        .await
        .unwrap();
    session::submit_exam(store.as_ref(), session_id, student, SubmitReason::Manual, Utc::now())
        .await
        .unwrap();

    let late = tab_switch().into_violation(session_id, Utc::now());
    assert!(store.append_violation(&late).await.unwrap().is_none());
    assert!(matches!(
        session::log_violation(store.as_ref(), session_id, student, tab_switch(), Utc::now()).await,
        Err(AppError::InvalidState(_))
    ));

    let session = store.get_session(session_id).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.warning_count, 1);
    assert_eq!(store.list_violations(session_id).await.unwrap().len(), 1);

    // The ledger entry keeps the session alive.
    assert_eq!(
        store.delete_session_if_unreferenced(session_id).await.unwrap(),
        DeleteOutcome::Referenced(1)
    );
}

#[tokio::test]
async fn threshold_violation_auto_submits_once() {
    let Some(store) = pg_store().await else { return };
    let (exam, student) = seed_exam(store.as_ref(), 2).await;
    let started = session::start_session(store.as_ref(), exam.id, student, Utc::now())
        .await
        .unwrap();
    let session_id = started.session.id;

    let first = session::log_violation(store.as_ref(), session_id, student, tab_switch(), Utc::now())
        .await
        .unwrap();
    assert!(!first.response.auto_submitted);

    let second = session::log_violation(store.as_ref(), session_id, student, tab_switch(), Utc::now())
        .await
        .unwrap();
    assert!(second.response.auto_submitted);
    assert_eq!(second.session.status, SessionStatus::AutoSubmitted);
    assert!(!second.session.can_view_answers);
}
