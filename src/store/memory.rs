// src/store/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DeleteOutcome, InsertOutcome, Store};
use crate::{
    error::AppError,
    models::{
        exam::Exam,
        session::{ExamSession, SessionStatus},
        violation::Violation,
    },
};

#[derive(Default)]
struct Tables {
    exams: HashMap<Uuid, Exam>,
    sessions: HashMap<Uuid, ExamSession>,
    /// (exam_id, student_id) -> session id; the uniqueness index.
    session_keys: HashMap<(Uuid, Uuid), Uuid>,
    violations: Vec<Violation>,
}

/// Process-local store. Every operation takes the single table lock, which
/// gives the same atomicity the Postgres backend gets from its constraints.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>, AppError> {
        Ok(self.tables.read().await.exams.get(&id).cloned())
    }

    async fn insert_exam(&self, exam: Exam) -> Result<Exam, AppError> {
        let mut tables = self.tables.write().await;
        if tables.exams.contains_key(&exam.id) {
            return Err(AppError::Conflict("Exam already exists".to_string()));
        }
        tables.exams.insert(exam.id, exam.clone());
        Ok(exam)
    }

    async fn set_exam_active(&self, id: Uuid, active: bool) -> Result<Option<Exam>, AppError> {
        let mut tables = self.tables.write().await;
        Ok(tables.exams.get_mut(&id).map(|exam| {
            exam.is_active = active;
            exam.clone()
        }))
    }

    async fn list_exams_for_student(&self, student_id: Uuid) -> Result<Vec<Exam>, AppError> {
        let tables = self.tables.read().await;
        let mut exams: Vec<Exam> = tables
            .exams
            .values()
            .filter(|e| e.is_active && e.is_allowed(student_id))
            .cloned()
            .collect();
        exams.sort_by_key(|e| e.scheduled_at);
        Ok(exams)
    }

    async fn list_exams_by_creator(&self, creator: Option<Uuid>) -> Result<Vec<Exam>, AppError> {
        let tables = self.tables.read().await;
        let mut exams: Vec<Exam> = tables
            .exams
            .values()
            .filter(|e| creator.is_none_or(|c| e.created_by == c))
            .cloned()
            .collect();
        exams.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(exams)
    }

    async fn delete_exam_if_unreferenced(&self, id: Uuid) -> Result<DeleteOutcome, AppError> {
        let mut tables = self.tables.write().await;
        if !tables.exams.contains_key(&id) {
            return Ok(DeleteOutcome::NotFound);
        }
        let refs = tables.sessions.values().filter(|s| s.exam_id == id).count() as u64;
        if refs > 0 {
            return Ok(DeleteOutcome::Referenced(refs));
        }
        tables.exams.remove(&id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn insert_session_if_absent(&self, session: ExamSession) -> Result<InsertOutcome, AppError> {
        let mut tables = self.tables.write().await;
        let key = (session.exam_id, session.student_id);
        if let Some(existing_id) = tables.session_keys.get(&key) {
            let existing = tables.sessions.get(existing_id).cloned().ok_or_else(|| {
                AppError::InternalServerError("session index points at a missing row".to_string())
            })?;
            return Ok(InsertOutcome::Existing(existing));
        }
        tables.session_keys.insert(key, session.id);
        tables.sessions.insert(session.id, session.clone());
        Ok(InsertOutcome::Created(session))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ExamSession>, AppError> {
        Ok(self.tables.read().await.sessions.get(&id).cloned())
    }

    async fn find_session(&self, exam_id: Uuid, student_id: Uuid) -> Result<Option<ExamSession>, AppError> {
        let tables = self.tables.read().await;
        Ok(tables
            .session_keys
            .get(&(exam_id, student_id))
            .and_then(|id| tables.sessions.get(id))
            .cloned())
    }

    async fn list_sessions_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamSession>, AppError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ExamSession> = tables
            .sessions
            .values()
            .filter(|s| s.exam_id == exam_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn list_sessions_for_student(&self, student_id: Uuid) -> Result<Vec<ExamSession>, AppError> {
        let tables = self.tables.read().await;
        let mut sessions: Vec<ExamSession> = tables
            .sessions
            .values()
            .filter(|s| s.student_id == student_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn update_session_if_current(&self, session: &ExamSession) -> Result<Option<ExamSession>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.sessions.get_mut(&session.id) else {
            return Ok(None);
        };
        if stored.status != SessionStatus::InProgress || stored.version != session.version {
            return Ok(None);
        }
        let mut next = session.clone();
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(Some(next))
    }

    async fn append_violation(&self, violation: &Violation) -> Result<Option<ExamSession>, AppError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get_mut(&violation.session_id) else {
            return Ok(None);
        };
        if session.status != SessionStatus::InProgress {
            return Ok(None);
        }
        session.warning_count += 1;
        session.violation_ids.push(violation.id);
        session.version += 1;
        let updated = session.clone();
        tables.violations.push(violation.clone());
        Ok(Some(updated))
    }

    async fn delete_session_if_unreferenced(&self, id: Uuid) -> Result<DeleteOutcome, AppError> {
        let mut tables = self.tables.write().await;
        let Some(session) = tables.sessions.get(&id) else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !session.status.is_terminal() {
            return Ok(DeleteOutcome::Active);
        }
        let refs = tables.violations.iter().filter(|v| v.session_id == id).count() as u64;
        if refs > 0 {
            return Ok(DeleteOutcome::Referenced(refs));
        }
        let key = (session.exam_id, session.student_id);
        tables.session_keys.remove(&key);
        tables.sessions.remove(&id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn list_violations(&self, session_id: Uuid) -> Result<Vec<Violation>, AppError> {
        let tables = self.tables.read().await;
        let mut violations: Vec<Violation> = tables
            .violations
            .iter()
            .filter(|v| v.session_id == session_id)
            .cloned()
            .collect();
        violations.sort_by_key(|v| v.timestamp);
        Ok(violations)
    }
}
