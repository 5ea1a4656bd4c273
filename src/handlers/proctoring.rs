// src/handlers/proctoring.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        session::{SubmitAnswerRequest, SubmitExamRequest},
        violation::LogViolationRequest,
    },
    proctoring::session,
    realtime::{Notifier, Room, ServerEvent},
    store::Store,
    utils::jwt::Claims,
};

/// Starts the student's attempt, or resumes the one already in progress.
///
/// * 201 with a fresh session.
/// * 200 when an in-progress session already existed (including a lost start race).
/// * 409 with `redirectTo` when the attempt was already submitted.
pub async fn start_exam(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let started = session::start_session(store.as_ref(), exam_id, student_id, Utc::now()).await?;

    let (status, message) = if started.resumed {
        (StatusCode::OK, "Resuming existing session")
    } else {
        (StatusCode::CREATED, "Exam session started successfully")
    };

    Ok((
        status,
        Json(json!({
            "message": message,
            "session": session::student_session(&started.exam, &started.session)?,
        })),
    ))
}

/// Returns the session's questions without the answer key.
pub async fn get_questions(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let questions = session::get_questions(store.as_ref(), session_id, student_id).await?;

    Ok(Json(questions))
}

/// Saves one answer. `selectedOption` is the index as displayed.
pub async fn submit_answer(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let saved = session::submit_answer(store.as_ref(), session_id, student_id, payload).await?;

    Ok(Json(saved))
}

/// Grades and closes the session.
///
/// The body is optional; `{"reason": "time-expired"}` marks a timer expiry.
pub async fn submit_exam(
    State(store): State<Arc<dyn Store>>,
    State(notifier): State<Arc<Notifier>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    payload: Option<Json<SubmitExamRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let reason = payload.map(|Json(p)| p.reason).unwrap_or_default();

    let finalized =
        session::submit_exam(store.as_ref(), session_id, student_id, reason, Utc::now()).await?;

    notifier
        .publish(
            Room::Monitor(finalized.exam.id),
            ServerEvent::submission(&finalized.session),
        )
        .await;

    Ok(Json(session::submission_response(&finalized)))
}

/// Records a proctoring incident. Reaching the exam's warning threshold
/// auto-submits the session.
pub async fn log_violation(
    State(store): State<Arc<dyn Store>>,
    State(notifier): State<Arc<Notifier>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
    Json(payload): Json<LogViolationRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let student_id = claims.user_id()?;
    let logged =
        session::log_violation(store.as_ref(), session_id, student_id, payload, Utc::now()).await?;

    let monitor = Room::Monitor(logged.exam.id);
    notifier
        .publish(
            monitor,
            ServerEvent::ViolationAlert {
                session_id,
                student_id,
                violation: logged.response.violation.clone(),
                warning_count: logged.response.warning_count,
                threshold: logged.response.threshold,
                auto_submitted: logged.response.auto_submitted,
            },
        )
        .await;

    if logged.response.auto_submitted {
        notifier
            .publish(monitor, ServerEvent::submission(&logged.session))
            .await;
        notifier
            .publish(
                Room::Session(session_id),
                ServerEvent::ForceSubmit {
                    session_id,
                    reason: "Warning threshold reached".to_string(),
                },
            )
            .await;
    }

    Ok((StatusCode::CREATED, Json(logged.response)))
}

/// Results of a finished session, for its owner.
pub async fn get_results(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let results = session::results(store.as_ref(), session_id, student_id).await?;

    Ok(Json(json!({ "results": results })))
}

/// Violation ledger of a session, oldest first.
pub async fn get_violations(
    State(store): State<Arc<dyn Store>>,
    Extension(claims): Extension<Claims>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let requester = claims.user_id()?;
    let violations =
        session::list_violations(store.as_ref(), session_id, requester, claims.is_admin()).await?;

    Ok(Json(json!({
        "count": violations.len(),
        "violations": violations,
    })))
}
