// src/handlers/student.rs

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json,
    extract::{Extension, State},
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        exam::StudentExamSummary,
        session::{ExamSession, SessionHistoryEntry},
    },
    store::Store,
    utils::jwt::Claims,
};

/// Active exams the student is enrolled in, with schedule status and attempt info.
pub async fn available_exams(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let now = Utc::now();

    let exams = store.list_exams_for_student(student_id).await?;
    let sessions: HashMap<Uuid, ExamSession> = store
        .list_sessions_for_student(student_id)
        .await?
        .into_iter()
        .map(|s| (s.exam_id, s))
        .collect();

    let summaries: Vec<StudentExamSummary> = exams
        .into_iter()
        .map(|exam| {
            let attempt = sessions.get(&exam.id);
            StudentExamSummary {
                id: exam.id,
                status: exam.window_at(now),
                total_questions: exam.questions.len(),
                title: exam.title,
                description: exam.description,
                course: exam.course,
                duration: exam.duration,
                total_marks: exam.total_marks,
                passing_marks: exam.passing_marks,
                scheduled_at: exam.scheduled_at,
                end_at: exam.end_at,
                proctoring_settings: exam.proctoring_settings,
                attempted: attempt.is_some(),
                session_id: attempt.map(|s| s.id),
                session_status: attempt.map(|s| s.status),
                score: attempt.filter(|s| s.status.is_terminal()).map(|s| s.score),
            }
        })
        .collect();

    Ok(Json(summaries))
}

/// The student's finished and running attempts, newest first.
pub async fn exam_history(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let sessions = store.list_sessions_for_student(student_id).await?;

    let mut history = Vec::with_capacity(sessions.len());
    for session in sessions {
        // Exams can only be deleted once they have no sessions, so a missing
        // exam here means the row was removed out of band.
        let Some(exam) = store.get_exam(session.exam_id).await? else {
            tracing::warn!(session_id = %session.id, "history entry references a missing exam");
            continue;
        };
        history.push(SessionHistoryEntry {
            session_id: session.id,
            exam_id: exam.id,
            exam_title: exam.title,
            course: exam.course,
            status: session.status,
            score: session.score,
            total_marks: exam.total_marks,
            percentage: crate::proctoring::grading::round_percentage(session.percentage),
            result: session.result,
            start_time: session.start_time,
            end_time: session.end_time,
            warning_count: session.warning_count,
            violation_count: session.violation_ids.len(),
        });
    }

    Ok(Json(history))
}
