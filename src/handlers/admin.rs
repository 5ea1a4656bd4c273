// src/handlers/admin.rs

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    error::AppError,
    store::{DeleteOutcome, Store},
};

/// Deletes a session record.
/// Admin only. Blocked while the session is running or violations point at it.
pub async fn delete_session(
    State(store): State<Arc<dyn Store>>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    match store.delete_session_if_unreferenced(session_id).await? {
        DeleteOutcome::Deleted => {
            tracing::info!(%session_id, "session deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        DeleteOutcome::NotFound => Err(AppError::NotFound("Session not found".to_string())),
        DeleteOutcome::Active => Err(AppError::InvalidState(
            "Cannot delete a session that is still in progress".to_string(),
        )),
        DeleteOutcome::Referenced(count) => Err(AppError::Conflict(format!(
            "Cannot delete session referenced by {} violation(s)",
            count
        ))),
    }
}
