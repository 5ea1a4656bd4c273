// src/proctoring/session.rs

//! The exam session lifecycle.
//!
//! `in-progress` is the only mutable state. Every write goes through the
//! store's conditional primitives, so a session that reached a terminal state
//! can never be modified again, whichever request got there first.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use super::{
    grading::{grade, round_percentage},
    projection::{canonical_option, display_answers, project, question_order},
};
use crate::{
    config::MAX_WRITE_RETRIES,
    error::AppError,
    models::{
        exam::{Exam, ExamWindow},
        session::{
            Answer, AnswerReview, AnswerSaved, ExamMeta, ExamSession, QuestionsResponse,
            ResultsView, ScoreBreakdown, SessionStatus, SubmitAnswerRequest, SubmitExamResponse,
            SubmitReason, SubmittedSession,
        },
        violation::{LogViolationRequest, LogViolationResponse, Violation, ViolationSummary},
    },
    store::{InsertOutcome, Store},
};

/// Outcome of [`start_session`].
#[derive(Debug)]
pub struct Started {
    pub session: ExamSession,
    pub exam: Exam,
    /// `true` when an in-progress session already existed.
    pub resumed: bool,
}

/// The session as its student sees it: saved answers are re-expressed in
/// display option indices, so the option mapping stays on the server.
pub fn student_session(exam: &Exam, session: &ExamSession) -> Result<serde_json::Value, AppError> {
    let projection = project(exam, session);
    let mut value = serde_json::to_value(session)?;
    value["answers"] = serde_json::to_value(display_answers(&projection, &session.answers))?;
    Ok(value)
}

/// Outcome of [`log_violation`].
#[derive(Debug)]
pub struct ViolationLogged {
    pub violation: Violation,
    pub session: ExamSession,
    pub exam: Exam,
    pub response: LogViolationResponse,
}

/// A session that just reached a terminal state, with its exam.
#[derive(Debug)]
pub struct Finalized {
    pub session: ExamSession,
    pub exam: Exam,
}

fn already_submitted(session: &ExamSession) -> AppError {
    AppError::AlreadySubmitted {
        session_id: session.id,
        message: format!("You have already {} this exam", session.status.as_str()),
    }
}

async fn load_exam(store: &dyn Store, exam_id: Uuid) -> Result<Exam, AppError> {
    store
        .get_exam(exam_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))
}

async fn load_session(store: &dyn Store, session_id: Uuid) -> Result<ExamSession, AppError> {
    store
        .get_session(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
}

/// Loads a session the requesting student owns.
async fn load_owned(store: &dyn Store, session_id: Uuid, student_id: Uuid) -> Result<ExamSession, AppError> {
    let session = load_session(store, session_id).await?;
    if session.student_id != student_id {
        return Err(AppError::Forbidden("Not authorized to access this session".to_string()));
    }
    Ok(session)
}

/// Starts (or resumes) the student's single attempt at an exam.
pub async fn start_session(
    store: &dyn Store,
    exam_id: Uuid,
    student_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Started, AppError> {
    let exam = load_exam(store, exam_id).await?;

    if !exam.is_active {
        return Err(AppError::InvalidState("This exam is not active".to_string()));
    }

    match exam.window_at(now) {
        ExamWindow::Upcoming => {
            return Err(AppError::InvalidState(format!(
                "Exam has not started yet. Starts at {}",
                exam.scheduled_at.to_rfc3339()
            )));
        }
        ExamWindow::Ended => return Err(AppError::InvalidState("Exam has ended".to_string())),
        ExamWindow::Ongoing => {}
    }

    if !exam.is_allowed(student_id) {
        return Err(AppError::InvalidState(
            "You are not on the roster for this exam".to_string(),
        ));
    }

    if let Some(existing) = store.find_session(exam_id, student_id).await? {
        return resume(existing, exam);
    }

    let fresh = {
        let mut rng = rand::thread_rng();
        let order = question_order(exam.questions.len(), exam.settings.shuffle_questions, &mut rng);
        ExamSession::new(exam_id, student_id, order, rng.r#gen(), now)
    };

    match store.insert_session_if_absent(fresh).await? {
        InsertOutcome::Created(session) => {
            tracing::info!(session_id = %session.id, %exam_id, %student_id, "exam session started");
            Ok(Started {
                session,
                exam,
                resumed: false,
            })
        }
        // A concurrent start won the slot.
        InsertOutcome::Existing(existing) => resume(existing, exam),
    }
}

fn resume(existing: ExamSession, exam: Exam) -> Result<Started, AppError> {
    if existing.status.is_terminal() {
        return Err(already_submitted(&existing));
    }
    tracing::debug!(session_id = %existing.id, "resuming exam session");
    Ok(Started {
        session: existing,
        exam,
        resumed: true,
    })
}

/// Questions of an in-progress session, in the order and option layout the
/// student sees.
pub async fn get_questions(
    store: &dyn Store,
    session_id: Uuid,
    student_id: Uuid,
) -> Result<QuestionsResponse, AppError> {
    let session = load_owned(store, session_id, student_id).await?;
    if session.status.is_terminal() {
        return Err(AppError::InvalidState(format!(
            "Session is {}. Cannot retrieve questions.",
            session.status.as_str()
        )));
    }
    let exam = load_exam(store, session.exam_id).await?;

    let projection = project(&exam, &session);
    let current_answers = display_answers(&projection, &session.answers);

    Ok(QuestionsResponse {
        exam: ExamMeta {
            title: exam.title.clone(),
            duration: exam.duration,
            total_marks: exam.total_marks,
            total_questions: projection.questions.len(),
            proctoring_settings: exam.proctoring_settings.clone(),
        },
        questions: projection.questions,
        current_answers,
    })
}

/// Saves (or replaces) the answer to one question.
pub async fn submit_answer(
    store: &dyn Store,
    session_id: Uuid,
    student_id: Uuid,
    req: SubmitAnswerRequest,
) -> Result<AnswerSaved, AppError> {
    let mut session = load_owned(store, session_id, student_id).await?;
    let exam = load_exam(store, session.exam_id).await?;

    for _ in 0..MAX_WRITE_RETRIES {
        if session.status.is_terminal() {
            return Err(AppError::InvalidState(
                "Cannot submit answer. Session is not active.".to_string(),
            ));
        }

        let selected_option = canonical_option(&exam, &session, req.question_id, req.selected_option)?;
        let mut next = session.clone();
        next.upsert_answer(Answer {
            question_id: req.question_id,
            selected_option,
            is_correct: None,
            marks_awarded: 0.0,
            time_spent: req.time_spent.unwrap_or(0),
        });

        if let Some(saved) = store.update_session_if_current(&next).await? {
            return Ok(AnswerSaved {
                message: "Answer saved successfully".to_string(),
                answered_count: saved.answers.len(),
                total_questions: saved.total_questions,
            });
        }

        tracing::debug!(%session_id, "answer write lost a version race, retrying");
        session = load_session(store, session_id).await?;
    }

    Err(AppError::Conflict("Session is busy, please retry".to_string()))
}

/// Grades `session` and moves it to `terminal_status` in one conditional
/// write. A version race re-reads and re-grades; a session that is already
/// terminal yields `AlreadySubmitted`.
pub async fn finalize(
    store: &dyn Store,
    exam: &Exam,
    mut session: ExamSession,
    terminal_status: SessionStatus,
    now: DateTime<Utc>,
) -> Result<ExamSession, AppError> {
    for _ in 0..MAX_WRITE_RETRIES {
        if session.status.is_terminal() {
            return Err(already_submitted(&session));
        }

        let report = grade(
            &session.answers,
            &exam.questions,
            exam.settings.negative_marking,
            exam.total_marks,
            exam.passing_marks,
            session.total_questions,
        );

        let mut next = session.clone();
        next.status = terminal_status;
        next.answers = report.answers;
        next.score = report.score;
        next.percentage = report.percentage;
        next.result = report.result;
        next.correct_answers = report.correct;
        next.wrong_answers = report.wrong;
        next.unanswered_questions = report.unanswered;
        next.end_time = Some(now);
        next.graded_at = Some(now);
        next.can_view_answers =
            terminal_status == SessionStatus::Completed && exam.settings.show_results_immediately;

        if let Some(stored) = store.update_session_if_current(&next).await? {
            tracing::info!(
                session_id = %stored.id,
                status = stored.status.as_str(),
                score = stored.score,
                "exam session finalized"
            );
            return Ok(stored);
        }

        session = load_session(store, session.id).await?;
    }

    Err(AppError::Conflict("Session is busy, please retry".to_string()))
}

/// Appends a violation and auto-submits once the warning threshold is hit.
pub async fn log_violation(
    store: &dyn Store,
    session_id: Uuid,
    student_id: Uuid,
    req: LogViolationRequest,
    now: DateTime<Utc>,
) -> Result<ViolationLogged, AppError> {
    let session = load_owned(store, session_id, student_id).await?;
    if session.status.is_terminal() {
        return Err(AppError::InvalidState("Session is not active".to_string()));
    }
    let exam = load_exam(store, session.exam_id).await?;

    let violation = req.into_violation(session_id, now);
    let updated = store
        .append_violation(&violation)
        .await?
        .ok_or_else(|| AppError::InvalidState("Session is not active".to_string()))?;

    let threshold = exam.warning_threshold();
    let warning_count = updated.warning_count;

    tracing::warn!(
        %session_id,
        violation_type = violation.violation_type.as_str(),
        warning_count,
        threshold,
        "violation logged"
    );

    let (session, auto_submitted) = if warning_count >= threshold {
        match finalize(store, &exam, updated, SessionStatus::AutoSubmitted, now).await {
            Ok(finalized) => (finalized, true),
            // Someone else finalized between the append and the grading.
            Err(AppError::AlreadySubmitted { .. }) => (load_session(store, session_id).await?, false),
            Err(e) => return Err(e),
        }
    } else {
        (updated, false)
    };

    let response = LogViolationResponse {
        violation: ViolationSummary::from(&violation),
        warning_count,
        threshold,
        auto_submitted,
    };

    Ok(ViolationLogged {
        violation,
        session,
        exam,
        response,
    })
}

/// The student's own submission, manual or on timer expiry.
pub async fn submit_exam(
    store: &dyn Store,
    session_id: Uuid,
    student_id: Uuid,
    reason: SubmitReason,
    now: DateTime<Utc>,
) -> Result<Finalized, AppError> {
    let session = load_owned(store, session_id, student_id).await?;
    if session.status.is_terminal() {
        return Err(already_submitted(&session));
    }
    let exam = load_exam(store, session.exam_id).await?;

    let status = match reason {
        SubmitReason::Manual => SessionStatus::Completed,
        SubmitReason::TimeExpired => SessionStatus::AutoSubmitted,
    };
    let session = finalize(store, &exam, session, status, now).await?;

    Ok(Finalized { session, exam })
}

/// Staff-initiated termination. Only the exam's author or an admin may do it.
pub async fn terminate(
    store: &dyn Store,
    session_id: Uuid,
    requester_id: Uuid,
    is_admin: bool,
    now: DateTime<Utc>,
) -> Result<Finalized, AppError> {
    let session = load_session(store, session_id).await?;
    let exam = load_exam(store, session.exam_id).await?;

    if !is_admin && exam.created_by != requester_id {
        return Err(AppError::Forbidden("Not authorized to terminate this session".to_string()));
    }

    let session = finalize(store, &exam, session, SessionStatus::Terminated, now).await?;

    Ok(Finalized { session, exam })
}

/// Response body for a finished submission.
pub fn submission_response(finalized: &Finalized) -> SubmitExamResponse {
    let session = &finalized.session;
    let exam = &finalized.exam;

    let results = exam.settings.show_results_immediately.then(|| ScoreBreakdown {
        score: session.score,
        total_marks: exam.total_marks,
        percentage: round_percentage(session.percentage),
        result: session.result,
        correct_answers: session.correct_answers,
        wrong_answers: session.wrong_answers,
        unanswered_questions: session.unanswered_questions,
    });

    SubmitExamResponse {
        message: "Exam submitted and graded successfully".to_string(),
        session: SubmittedSession {
            id: session.id,
            status: session.status,
            end_time: session.end_time,
            score: session.score,
            percentage: round_percentage(session.percentage),
            result: session.result,
        },
        results,
    }
}

/// Results of a finished session for its owner.
pub async fn results(
    store: &dyn Store,
    session_id: Uuid,
    student_id: Uuid,
) -> Result<ResultsView, AppError> {
    let session = load_owned(store, session_id, student_id).await?;
    if !session.status.is_terminal() {
        return Err(AppError::InvalidState("Exam not yet completed".to_string()));
    }
    let exam = load_exam(store, session.exam_id).await?;

    Ok(results_view(&exam, &session))
}

pub fn results_view(exam: &Exam, session: &ExamSession) -> ResultsView {
    let time_taken = session
        .end_time
        .map(|end| ((end - session.start_time).num_seconds() as f64 / 60.0).round() as i64)
        .unwrap_or(0);

    let answers = session.can_view_answers.then(|| {
        session
            .answers
            .iter()
            .map(|answer| match exam.question(answer.question_id) {
                Some(question) => AnswerReview {
                    question_text: question.question_text.clone(),
                    selected_option: Some(answer.selected_option),
                    selected_answer: question
                        .options
                        .get(answer.selected_option as usize)
                        .cloned()
                        .unwrap_or_default(),
                    correct_answer: question
                        .options
                        .get(question.correct_answer as usize)
                        .cloned()
                        .unwrap_or_default(),
                    is_correct: answer.is_correct.unwrap_or(false),
                    marks_awarded: answer.marks_awarded,
                    explanation: question.explanation.clone(),
                },
                None => AnswerReview {
                    question_text: "Question not found".to_string(),
                    selected_option: None,
                    selected_answer: "N/A".to_string(),
                    correct_answer: "N/A".to_string(),
                    is_correct: false,
                    marks_awarded: 0.0,
                    explanation: None,
                },
            })
            .collect()
    });

    ResultsView {
        exam_title: exam.title.clone(),
        status: session.status,
        score: session.score,
        total_marks: exam.total_marks,
        passing_marks: exam.passing_marks,
        percentage: round_percentage(session.percentage),
        result: session.result,
        correct_answers: session.correct_answers,
        wrong_answers: session.wrong_answers,
        unanswered_questions: session.unanswered_questions,
        total_questions: session.total_questions,
        warning_count: session.warning_count,
        violation_count: session.violation_ids.len(),
        start_time: session.start_time,
        end_time: session.end_time,
        time_taken,
        answers,
    }
}

/// Violations of a session, oldest first. Visible to the owning student, the
/// exam's author and admins.
pub async fn list_violations(
    store: &dyn Store,
    session_id: Uuid,
    requester_id: Uuid,
    is_admin: bool,
) -> Result<Vec<Violation>, AppError> {
    let session = load_session(store, session_id).await?;
    let exam = load_exam(store, session.exam_id).await?;

    let allowed = is_admin || session.student_id == requester_id || exam.created_by == requester_id;
    if !allowed {
        return Err(AppError::Forbidden("Not authorized to view violations".to_string()));
    }

    store.list_violations(session_id).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::{
        models::{
            exam::{ExamSettings, NegativeMarking, ProctoringSettings, Question},
            session::ResultStatus,
            violation::ViolationType,
        },
        store::memory::MemoryStore,
    };

    fn exam_with(questions: usize, passing: u32, threshold: u32, settings: ExamSettings) -> Exam {
        let now = Utc::now();
        let questions: Vec<Question> = (0..questions)
            .map(|i| Question {
                id: Uuid::new_v4(),
                question_text: format!("Q{}", i + 1),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_answer: 1,
                marks: 1,
                explanation: None,
                image: None,
            })
            .collect();
        Exam {
            id: Uuid::new_v4(),
            title: "Networks".into(),
            description: String::new(),
            course: "CS301".into(),
            created_by: Uuid::new_v4(),
            duration: 60,
            total_marks: questions.len() as u32,
            passing_marks: passing,
            questions,
            scheduled_at: now - Duration::minutes(5),
            end_at: now + Duration::hours(1),
            allowed_students: Vec::new(),
            proctoring_settings: ProctoringSettings {
                warning_threshold: threshold,
                ..ProctoringSettings::default()
            },
            settings,
            is_active: true,
            created_at: now,
        }
    }

    async fn setup(exam: Exam) -> (Arc<MemoryStore>, Exam, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let student = Uuid::new_v4();
        let mut exam = exam;
        exam.allowed_students.push(student);
        let exam = store.insert_exam(exam).await.unwrap();
        (store, exam, student)
    }

    fn violation(kind: ViolationType) -> LogViolationRequest {
        LogViolationRequest {
            violation_type: kind,
            severity: None,
            snapshot: None,
            metadata: Default::default(),
            description: None,
        }
    }

    #[tokio::test]
    async fn start_twice_resumes_the_same_session() {
        let (store, exam, student) = setup(exam_with(3, 2, 3, ExamSettings::default())).await;
        let first = start_session(&*store, exam.id, student, Utc::now()).await.unwrap();
        let second = start_session(&*store, exam.id, student, Utc::now()).await.unwrap();
        assert!(!first.resumed);
        assert!(second.resumed);
        assert_eq!(first.session.id, second.session.id);
    }

    #[tokio::test]
    async fn start_outside_window_or_roster_is_rejected() {
        let (store, exam, student) = setup(exam_with(3, 2, 3, ExamSettings::default())).await;
        let early = exam.scheduled_at - Duration::minutes(1);
        assert!(matches!(
            start_session(&*store, exam.id, student, early).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            start_session(&*store, exam.id, Uuid::new_v4(), Utc::now()).await,
            Err(AppError::InvalidState(_))
        ));
        // Both window bounds are inclusive.
        assert!(start_session(&*store, exam.id, student, exam.end_at).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_starts_create_exactly_one_session() {
        let (store, exam, student) = setup(exam_with(3, 2, 3, ExamSettings::default())).await;
        let exam_id = exam.id;
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                start_session(&*store, exam_id, student, Utc::now()).await.unwrap()
            }));
        }
        let mut ids = Vec::new();
        let mut created = 0;
        for h in handles {
            let started = h.await.unwrap();
            if !started.resumed {
                created += 1;
            }
            ids.push(started.session.id);
        }
        ids.dedup();
        assert_eq!(created, 1);
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn threshold_violation_auto_submits_and_freezes_the_session() {
        let (store, exam, student) = setup(exam_with(4, 2, 3, ExamSettings::default())).await;
        let started = start_session(&*store, exam.id, student, Utc::now()).await.unwrap();
        let sid = started.session.id;

        let answer = SubmitAnswerRequest {
            question_id: exam.questions[0].id,
            selected_option: 1,
            time_spent: Some(12),
        };
        submit_answer(&*store, sid, student, answer).await.unwrap();

        for expected in 1..=2 {
            let logged = log_violation(&*store, sid, student, violation(ViolationType::TabSwitch), Utc::now())
                .await
                .unwrap();
            assert_eq!(logged.response.warning_count, expected);
            assert!(!logged.response.auto_submitted);
        }
        let third = log_violation(&*store, sid, student, violation(ViolationType::WindowBlur), Utc::now())
            .await
            .unwrap();
        assert!(third.response.auto_submitted);
        assert_eq!(third.session.status, SessionStatus::AutoSubmitted);
        assert_eq!(third.session.score, 1.0);
        assert!(!third.session.can_view_answers);

        assert!(matches!(
            log_violation(&*store, sid, student, violation(ViolationType::TabSwitch), Utc::now()).await,
            Err(AppError::InvalidState(_))
        ));
        assert!(matches!(
            submit_exam(&*store, sid, student, SubmitReason::Manual, Utc::now()).await,
            Err(AppError::AlreadySubmitted { .. })
        ));
        let stored = store.get_session(sid).await.unwrap().unwrap();
        assert_eq!(stored.warning_count, 3);
        assert_eq!(store.list_violations(sid).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn manual_submit_completes_and_time_expiry_auto_submits() {
        let settings = ExamSettings {
            negative_marking: NegativeMarking { enabled: false, deduction: 0.25 },
            ..ExamSettings::default()
        };
        let (store, exam, student) = setup(exam_with(2, 1, 3, settings)).await;
        let sid = start_session(&*store, exam.id, student, Utc::now()).await.unwrap().session.id;
        let done = submit_exam(&*store, sid, student, SubmitReason::Manual, Utc::now()).await.unwrap();
        assert_eq!(done.session.status, SessionStatus::Completed);
        assert_eq!(done.session.result, ResultStatus::Fail);
        assert!(done.session.can_view_answers);

        let other = Uuid::new_v4();
        let mut exam2 = exam_with(2, 1, 3, ExamSettings::default());
        exam2.allowed_students.push(other);
        let exam2 = store.insert_exam(exam2).await.unwrap();
        let sid2 = start_session(&*store, exam2.id, other, Utc::now()).await.unwrap().session.id;
        let expired = submit_exam(&*store, sid2, other, SubmitReason::TimeExpired, Utc::now()).await.unwrap();
        assert_eq!(expired.session.status, SessionStatus::AutoSubmitted);
        assert!(!expired.session.can_view_answers);
    }

    #[tokio::test]
    async fn only_the_author_or_an_admin_may_terminate() {
        let (store, exam, student) = setup(exam_with(2, 1, 3, ExamSettings::default())).await;
        let sid = start_session(&*store, exam.id, student, Utc::now()).await.unwrap().session.id;
        assert!(matches!(
            terminate(&*store, sid, Uuid::new_v4(), false, Utc::now()).await,
            Err(AppError::Forbidden(_))
        ));
        let done = terminate(&*store, sid, exam.created_by, false, Utc::now()).await.unwrap();
        assert_eq!(done.session.status, SessionStatus::Terminated);
        assert_eq!(done.session.unanswered_questions, 2);
        assert!(matches!(
            terminate(&*store, sid, Uuid::new_v4(), true, Utc::now()).await,
            Err(AppError::AlreadySubmitted { .. })
        ));
    }

    #[tokio::test]
    async fn results_hide_answers_unless_viewable() {
        let settings = ExamSettings {
            show_results_immediately: false,
            ..ExamSettings::default()
        };
        let (store, exam, student) = setup(exam_with(2, 1, 3, settings)).await;
        let sid = start_session(&*store, exam.id, student, Utc::now()).await.unwrap().session.id;
        assert!(matches!(
            results(&*store, sid, student).await,
            Err(AppError::InvalidState(_))
        ));
        submit_exam(&*store, sid, student, SubmitReason::Manual, Utc::now()).await.unwrap();
        let view = results(&*store, sid, student).await.unwrap();
        assert!(view.answers.is_none());
        assert!(matches!(
            results(&*store, sid, Uuid::new_v4()).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
