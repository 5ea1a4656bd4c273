// tests/proctoring_tests.rs

use std::sync::Arc;

use chrono::{Duration, Utc};
use exam_proctor::{
    config::Config,
    routes,
    state::AppState,
    store::memory::MemoryStore,
    utils::jwt::{Role, sign_jwt},
};
use serde_json::{Value, json};
use uuid::Uuid;

const SECRET: &str = "proctoring_test_secret";

/// Spawns the app on a random port backed by the in-memory store.
async fn spawn_app() -> String {
    let config = Config {
        database_url: None,
        jwt_secret: SECRET.to_string(),
        rust_log: "error".to_string(),
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        cors_origins: Vec::new(),
    };

    let state = AppState::new(Arc::new(MemoryStore::new()), config);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    address
}

fn user(role: Role) -> (Uuid, String) {
    let id = Uuid::new_v4();
    let token = sign_jwt(id, "Test User", role, SECRET, 600).unwrap();
    (id, token)
}

/// Ten single-mark questions. Option texts carry the question number so a
/// shuffled display can be mapped back in tests.
fn questions(count: usize) -> Vec<Value> {
    (1..=count)
        .map(|i| {
            json!({
                "questionText": format!("Question {}", i),
                "options": [
                    format!("right {}", i),
                    format!("wrong a {}", i),
                    format!("wrong b {}", i),
                    format!("wrong c {}", i),
                ],
                "correctAnswer": 0,
                "marks": 1,
                "explanation": format!("Because {}", i),
            })
        })
        .collect()
}

async fn create_exam(
    client: &reqwest::Client,
    address: &str,
    faculty_token: &str,
    students: &[Uuid],
    overrides: Value,
) -> Value {
    let now = Utc::now();
    let mut body = json!({
        "title": "Operating Systems Midterm",
        "course": "CS-340",
        "duration": 60,
        "passingMarks": 6,
        "questions": questions(10),
        "scheduledAt": now - Duration::hours(1),
        "endAt": now + Duration::hours(2),
        "allowedStudents": students,
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), overrides.as_object()) {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }

    let response = client
        .post(format!("{}/api/faculty/exams", address))
        .bearer_auth(faculty_token)
        .json(&body)
        .send()
        .await
        .expect("Failed to execute request");
    assert_eq!(response.status().as_u16(), 201);
    response.json().await.unwrap()
}

async fn start(client: &reqwest::Client, address: &str, token: &str, exam_id: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/proctoring/start/{}", address, exam_id))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to execute request")
}

async fn questions_for(client: &reqwest::Client, address: &str, token: &str, session_id: &str) -> Value {
    client
        .get(format!("{}/api/proctoring/session/{}/questions", address, session_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn answer(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    session_id: &str,
    question_id: &str,
    option: usize,
) -> reqwest::Response {
    client
        .post(format!("{}/api/proctoring/answer/{}", address, session_id))
        .bearer_auth(token)
        .json(&json!({ "questionId": question_id, "selectedOption": option, "timeSpent": 12 }))
        .send()
        .await
        .unwrap()
}

async fn submit(client: &reqwest::Client, address: &str, token: &str, session_id: &str) -> reqwest::Response {
    client
        .post(format!("{}/api/proctoring/submit/{}", address, session_id))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
}

async fn violation(
    client: &reqwest::Client,
    address: &str,
    token: &str,
    session_id: &str,
    kind: &str,
) -> reqwest::Response {
    client
        .post(format!("{}/api/proctoring/violation/{}", address, session_id))
        .bearer_auth(token)
        .json(&json!({ "violationType": kind, "severity": "high" }))
        .send()
        .await
        .unwrap()
}

/// Display index of the option whose text is `text`.
fn index_of(question: &Value, text: &str) -> usize {
    question["options"]
        .as_array()
        .unwrap()
        .iter()
        .position(|o| o == text)
        .unwrap()
}

#[tokio::test]
async fn start_then_resume_returns_same_session() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;
    let exam_id = exam["id"].as_str().unwrap();

    let first = start(&client, &address, &student, exam_id).await;
    assert_eq!(first.status().as_u16(), 201);
    let first: Value = first.json().await.unwrap();
    assert_eq!(first["session"]["status"], "in-progress");
    assert!(first["session"].get("optionSeed").is_none());

    let second = start(&client, &address, &student, exam_id).await;
    assert_eq!(second.status().as_u16(), 200);
    let second: Value = second.json().await.unwrap();
    assert_eq!(first["session"]["id"], second["session"]["id"]);
}

#[tokio::test]
async fn concurrent_starts_create_one_session() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;
    let exam_id = exam["id"].as_str().unwrap().to_string();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let address = address.clone();
        let student = student.clone();
        let exam_id = exam_id.clone();
        handles.push(tokio::spawn(async move {
            let response = start(&client, &address, &student, &exam_id).await;
            let status = response.status().as_u16();
            let body: Value = response.json().await.unwrap();
            (status, body["session"]["id"].as_str().unwrap().to_string())
        }));
    }

    let mut created = 0;
    let mut ids = Vec::new();
    for handle in handles {
        let (status, id) = handle.await.unwrap();
        if status == 201 {
            created += 1;
        } else {
            assert_eq!(status, 200);
        }
        ids.push(id);
    }
    assert_eq!(created, 1);
    ids.dedup();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn start_is_refused_outside_roster_and_window() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let (_, outsider) = user(Role::Student);

    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;
    let response = start(&client, &address, &outsider, exam["id"].as_str().unwrap()).await;
    assert_eq!(response.status().as_u16(), 400);

    let now = Utc::now();
    let upcoming = create_exam(
        &client,
        &address,
        &faculty,
        &[student_id],
        json!({
            "scheduledAt": now + Duration::hours(1),
            "endAt": now + Duration::hours(3),
        }),
    )
    .await;
    let response = start(&client, &address, &student, upcoming["id"].as_str().unwrap()).await;
    assert_eq!(response.status().as_u16(), 400);

    let response = start(&client, &address, &student, &Uuid::new_v4().to_string()).await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn six_of_ten_passes_with_sixty_percent() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;

    let started: Value = start(&client, &address, &student, exam["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();

    let view = questions_for(&client, &address, &student, session_id).await;
    let shown = view["questions"].as_array().unwrap();
    assert_eq!(shown.len(), 10);
    assert!(shown.iter().all(|q| q.get("correctAnswer").is_none()));

    for (n, question) in shown.iter().enumerate() {
        let number = question["questionText"].as_str().unwrap().trim_start_matches("Question ");
        let text = if n < 6 {
            format!("right {}", number)
        } else {
            format!("wrong a {}", number)
        };
        let option = index_of(question, &text);
        let response = answer(
            &client,
            &address,
            &student,
            session_id,
            question["_id"].as_str().unwrap(),
            option,
        )
        .await;
        assert_eq!(response.status().as_u16(), 200);
    }

    let response = submit(&client, &address, &student, session_id).await;
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["session"]["status"], "completed");
    assert_eq!(body["results"]["score"], 6.0);
    assert_eq!(body["results"]["percentage"], 60.0);
    assert_eq!(body["results"]["result"], "pass");
    assert_eq!(body["results"]["unansweredQuestions"], 0);
    assert_eq!(body["results"]["wrongAnswers"], 4);

    let results: Value = client
        .get(format!("{}/api/proctoring/results/{}", address, session_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"]["correctAnswers"], 6);
    assert_eq!(results["results"]["answers"].as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn empty_submission_fails_with_everything_unanswered() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;

    let started: Value = start(&client, &address, &student, exam["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();

    let body: Value = submit(&client, &address, &student, session_id).await.json().await.unwrap();
    assert_eq!(body["results"]["score"], 0.0);
    assert_eq!(body["results"]["unansweredQuestions"], 10);
    assert_eq!(body["results"]["result"], "fail");
}

#[tokio::test]
async fn shuffled_options_grade_by_display_index() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(
        &client,
        &address,
        &faculty,
        &[student_id],
        json!({ "settings": { "shuffleQuestions": true, "shuffleOptions": true } }),
    )
    .await;

    let started: Value = start(&client, &address, &student, exam["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();

    let view = questions_for(&client, &address, &student, session_id).await;
    let mut chosen = std::collections::HashMap::new();
    for question in view["questions"].as_array().unwrap() {
        let number = question["questionText"].as_str().unwrap().trim_start_matches("Question ");
        let option = index_of(question, &format!("right {}", number));
        answer(
            &client,
            &address,
            &student,
            session_id,
            question["_id"].as_str().unwrap(),
            option,
        )
        .await;
        chosen.insert(question["_id"].as_str().unwrap().to_string(), option as u64);
    }

    // The saved answers come back in display indices.
    let again = questions_for(&client, &address, &student, session_id).await;
    assert_eq!(again["questions"], view["questions"]);
    assert_eq!(again["currentAnswers"].as_array().unwrap().len(), 10);

    // So does the resumed session.
    let resumed = start(&client, &address, &student, exam["id"].as_str().unwrap()).await;
    assert_eq!(resumed.status().as_u16(), 200);
    let resumed: Value = resumed.json().await.unwrap();
    let saved = resumed["session"]["answers"].as_array().unwrap();
    assert_eq!(saved.len(), 10);
    for entry in saved {
        let question_id = entry["questionId"].as_str().unwrap();
        assert_eq!(entry["selectedOption"].as_u64(), Some(chosen[question_id]));
    }

    let body: Value = submit(&client, &address, &student, session_id).await.json().await.unwrap();
    assert_eq!(body["results"]["score"], 10.0);
    assert_eq!(body["results"]["correctAnswers"], 10);
}

#[tokio::test]
async fn out_of_range_option_is_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;

    let started: Value = start(&client, &address, &student, exam["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();
    let view = questions_for(&client, &address, &student, session_id).await;
    let question_id = view["questions"][0]["_id"].as_str().unwrap();

    let response = answer(&client, &address, &student, session_id, question_id, 4).await;
    assert_eq!(response.status().as_u16(), 400);

    let response = answer(
        &client,
        &address,
        &student,
        session_id,
        &Uuid::new_v4().to_string(),
        0,
    )
    .await;
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn third_violation_auto_submits_and_freezes_session() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(
        &client,
        &address,
        &faculty,
        &[student_id],
        json!({ "proctoringSettings": { "warningThreshold": 3 } }),
    )
    .await;

    let started: Value = start(&client, &address, &student, exam["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();

    for expected in 1..=2 {
        let response = violation(&client, &address, &student, session_id, "tab-switch").await;
        assert_eq!(response.status().as_u16(), 201);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["warningCount"], expected);
        assert_eq!(body["autoSubmitted"], false);
    }

    let body: Value = violation(&client, &address, &student, session_id, "multiple-faces")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["warningCount"], 3);
    assert_eq!(body["threshold"], 3);
    assert_eq!(body["autoSubmitted"], true);

    // Terminal: no more answers, violations or submissions.
    let response = violation(&client, &address, &student, session_id, "tab-switch").await;
    assert_eq!(response.status().as_u16(), 400);

    let response = submit(&client, &address, &student, session_id).await;
    assert_eq!(response.status().as_u16(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(
        body["redirectTo"],
        format!("/api/proctoring/results/{}", session_id)
    );

    let response = start(&client, &address, &student, exam["id"].as_str().unwrap()).await;
    assert_eq!(response.status().as_u16(), 409);

    let results: Value = client
        .get(format!("{}/api/proctoring/results/{}", address, session_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(results["results"]["status"], "auto-submitted");
    assert_eq!(results["results"]["warningCount"], 3);
    assert_eq!(results["results"]["violationCount"], 3);
    assert!(results["results"]["answers"].is_null());

    let ledger: Value = client
        .get(format!("{}/api/proctoring/violations/{}", address, session_id))
        .bearer_auth(&faculty)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ledger["count"], 3);
    assert_eq!(ledger["violations"][2]["violationType"], "multiple-faces");
}

#[tokio::test]
async fn results_are_not_available_while_in_progress() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let (_, other_student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;

    let started: Value = start(&client, &address, &student, exam["id"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();

    let response = client
        .get(format!("{}/api/proctoring/results/{}", address, session_id))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let response = client
        .get(format!("{}/api/proctoring/violations/{}", address, session_id))
        .bearer_auth(&other_student)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let exam_id = Uuid::new_v4();

    let response = client
        .post(format!("{}/api/proctoring/start/{}", address, exam_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = start(&client, &address, "not-a-token", &exam_id.to_string()).await;
    assert_eq!(response.status().as_u16(), 401);

    // Faculty cannot take exams.
    let response = start(&client, &address, &faculty, &exam_id.to_string()).await;
    assert_eq!(response.status().as_u16(), 403);
}

#[tokio::test]
async fn student_listing_reports_window_and_attempt() {
    let address = spawn_app().await;
    let client = reqwest::Client::new();
    let (_, faculty) = user(Role::Faculty);
    let (student_id, student) = user(Role::Student);
    let exam = create_exam(&client, &address, &faculty, &[student_id], json!({})).await;
    let exam_id = exam["id"].as_str().unwrap();

    let listing: Value = client
        .get(format!("{}/api/student/exams", address))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listing[0]["status"], "ongoing");
    assert_eq!(listing[0]["attempted"], false);
    assert!(listing[0].get("questions").is_none());

    let started: Value = start(&client, &address, &student, exam_id).await.json().await.unwrap();
    let session_id = started["session"]["id"].as_str().unwrap();
    submit(&client, &address, &student, session_id).await;

    let history: Value = client
        .get(format!("{}/api/student/history", address))
        .bearer_auth(&student)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["status"], "completed");
}
