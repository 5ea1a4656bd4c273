// src/store/mod.rs

//! Persistence contract the session core depends on.
//!
//! Two backends implement it: [`postgres::PgStore`] (JSONB document columns)
//! and [`memory::MemoryStore`] (process-local, used when no database is
//! configured and by the test suite). Both provide the same atomic
//! primitives: insert-if-absent keyed by (exam, student), conditional update
//! keyed by (status, version), and violation append guarded by status.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{exam::Exam, session::ExamSession, violation::Violation},
};

/// Result of [`Store::insert_session_if_absent`].
#[derive(Debug, Clone)]
pub enum InsertOutcome {
    Created(ExamSession),
    /// Another session already held the (exam, student) slot.
    Existing(ExamSession),
}

/// Result of the referential-check deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    /// Dependent records still point at the target.
    Referenced(u64),
    /// The target is still in use (session not terminal).
    Active,
}

#[async_trait]
pub trait Store: Send + Sync {
    // --- exam catalog ---

    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>, AppError>;

    async fn insert_exam(&self, exam: Exam) -> Result<Exam, AppError>;

    async fn set_exam_active(&self, id: Uuid, active: bool) -> Result<Option<Exam>, AppError>;

    /// Exams whose allowed-student set contains `student_id`, active only.
    async fn list_exams_for_student(&self, student_id: Uuid) -> Result<Vec<Exam>, AppError>;

    /// All exams for admins, own exams for faculty.
    async fn list_exams_by_creator(&self, creator: Option<Uuid>) -> Result<Vec<Exam>, AppError>;

    /// Deletes the exam only when no session references it.
    async fn delete_exam_if_unreferenced(&self, id: Uuid) -> Result<DeleteOutcome, AppError>;

    // --- sessions ---

    /// Atomically inserts `session` unless one already exists for its
    /// (exam, student) pair, in which case the existing one is returned.
    async fn insert_session_if_absent(&self, session: ExamSession) -> Result<InsertOutcome, AppError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<ExamSession>, AppError>;

    async fn find_session(&self, exam_id: Uuid, student_id: Uuid) -> Result<Option<ExamSession>, AppError>;

    async fn list_sessions_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamSession>, AppError>;

    async fn list_sessions_for_student(&self, student_id: Uuid) -> Result<Vec<ExamSession>, AppError>;

    /// Writes every mutable field of `session` provided the stored row is
    /// still in progress and at `session.version`. Returns the stored session
    /// (with its bumped version) or `None` when the condition failed.
    async fn update_session_if_current(&self, session: &ExamSession) -> Result<Option<ExamSession>, AppError>;

    /// Appends the violation to the ledger and increments the session's
    /// warning count in one step, only while the session is in progress.
    /// Returns the updated session, or `None` when it was not in progress.
    async fn append_violation(&self, violation: &Violation) -> Result<Option<ExamSession>, AppError>;

    /// Deletes a terminal session that no violation references.
    async fn delete_session_if_unreferenced(&self, id: Uuid) -> Result<DeleteOutcome, AppError>;

    // --- violation ledger ---

    /// Oldest first.
    async fn list_violations(&self, session_id: Uuid) -> Result<Vec<Violation>, AppError>;
}
