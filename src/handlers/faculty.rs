// src/handlers/faculty.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        exam::{CreateExamRequest, Exam},
        session::{ExamSession, SessionStats},
    },
    proctoring::session,
    realtime::{Notifier, Room, ServerEvent},
    store::{DeleteOutcome, Store},
    utils::jwt::Claims,
};

/// Loads an exam the requester may manage: its author, or any admin.
async fn load_managed_exam(store: &dyn Store, claims: &Claims, exam_id: Uuid) -> Result<Exam, AppError> {
    let exam = store
        .get_exam(exam_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    if !claims.is_admin() && exam.created_by != claims.user_id()? {
        return Err(AppError::Forbidden("Not authorized to manage this exam".to_string()));
    }
    Ok(exam)
}

/// Creates an exam. Total marks are derived from the questions.
pub async fn create_exam(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    let exam = payload.into_exam(claims.user_id()?, Utc::now())?;
    let exam = store.insert_exam(exam).await?;

    tracing::info!(exam_id = %exam.id, created_by = %exam.created_by, "exam created");

    Ok((StatusCode::CREATED, Json(exam)))
}

/// Own exams for faculty, every exam for admins.
pub async fn list_exams(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let creator = if claims.is_admin() {
        None
    } else {
        Some(claims.user_id()?)
    };
    let exams = store.list_exams_by_creator(creator).await?;

    Ok(Json(exams))
}

pub async fn get_exam(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = load_managed_exam(store.as_ref(), &claims, exam_id).await?;
    Ok(Json(exam))
}

/// Flips `is_active`.
pub async fn toggle_exam(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = load_managed_exam(store.as_ref(), &claims, exam_id).await?;
    let exam = store
        .set_exam_active(exam.id, !exam.is_active)
        .await?
        .ok_or_else(|| AppError::NotFound("Exam not found".to_string()))?;

    let message = if exam.is_active {
        "Exam activated"
    } else {
        "Exam deactivated"
    };

    Ok(Json(json!({
        "message": message,
        "isActive": exam.is_active,
    })))
}

/// Deletes an exam nobody has attempted yet.
pub async fn delete_exam(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    load_managed_exam(store.as_ref(), &claims, exam_id).await?;

    match store.delete_exam_if_unreferenced(exam_id).await? {
        DeleteOutcome::Deleted => {
            tracing::info!(%exam_id, "exam deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        DeleteOutcome::NotFound => Err(AppError::NotFound("Exam not found".to_string())),
        DeleteOutcome::Referenced(count) => Err(AppError::Conflict(format!(
            "Cannot delete exam with {} existing session(s)",
            count
        ))),
        DeleteOutcome::Active => Err(AppError::Conflict("Exam is in use".to_string())),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExamSessionsResponse {
    exam_id: Uuid,
    title: String,
    stats: SessionStats,
    sessions: Vec<ExamSession>,
}

/// All sessions of one exam with aggregate statistics.
pub async fn exam_sessions(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let exam = load_managed_exam(store.as_ref(), &claims, exam_id).await?;
    let sessions = store.list_sessions_for_exam(exam_id).await?;

    Ok(Json(ExamSessionsResponse {
        exam_id,
        title: exam.title,
        stats: SessionStats::from_sessions(&sessions),
        sessions,
    }))
}

/// One session with its grading summary and full violation ledger.
pub async fn session_report(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
    let exam = load_managed_exam(store.as_ref(), &claims, session.exam_id).await?;
    let violations = store.list_violations(session_id).await?;

    let results = session
        .status
        .is_terminal()
        .then(|| session::results_view(&exam, &session));

    Ok(Json(json!({
        "session": session,
        "exam": {
            "id": exam.id,
            "title": exam.title,
            "totalMarks": exam.total_marks,
            "passingMarks": exam.passing_marks,
        },
        "results": results,
        "violations": violations,
    })))
}

/// Ends a running session on the invigilator's behalf. The session is graded
/// as it stands and the student's client is told to stop.
pub async fn terminate_session(
    State(store): State<Arc<dyn Store>>,
    State(notifier): State<Arc<Notifier>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let finalized = session::terminate(
        store.as_ref(),
        session_id,
        claims.user_id()?,
        claims.is_admin(),
        Utc::now(),
    )
    .await?;

    notifier
        .publish(
            Room::Session(session_id),
            ServerEvent::ForceSubmit {
                session_id,
                reason: "Session terminated by invigilator".to_string(),
            },
        )
        .await;
    notifier
        .publish(
            Room::Monitor(finalized.exam.id),
            ServerEvent::submission(&finalized.session),
        )
        .await;

    tracing::info!(%session_id, by = %claims.sub, "session terminated");

    Ok(Json(session::submission_response(&finalized)))
}
