// src/store/postgres.rs

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    FromRow, PgPool,
    postgres::PgPoolOptions,
    types::Json,
};
use uuid::Uuid;

use super::{DeleteOutcome, InsertOutcome, Store};
use crate::{
    error::AppError,
    models::{
        exam::{Exam, ExamSettings, ProctoringSettings, Question},
        session::{Answer, ExamSession, ResultStatus, SessionStatus},
        violation::{Severity, Violation, ViolationType},
    },
};

const EXAM_COLUMNS: &str = "id, title, description, course, created_by, duration, questions, \
     total_marks, passing_marks, scheduled_at, end_at, allowed_students, proctoring_settings, \
     settings, is_active, created_at";

const SESSION_COLUMNS: &str = "id, exam_id, student_id, status, start_time, end_time, \
     question_order, option_seed, answers, warning_count, violation_ids, score, total_questions, \
     correct_answers, wrong_answers, unanswered_questions, percentage, result, graded_at, \
     can_view_answers, version";

const VIOLATION_COLUMNS: &str =
    "id, session_id, violation_type, timestamp, snapshot, severity, metadata, description";

/// Connects to Postgres, retrying while the database comes up, then applies
/// the embedded migrations.
pub async fn connect_with_retry(database_url: &str) -> Result<PgPool, AppError> {
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    return Err(AppError::InternalServerError(format!(
                        "Failed to connect to database after 5 retries: {}",
                        e
                    )));
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to run migrations: {}", e)))?;
    tracing::info!("Migrations applied successfully.");

    Ok(pool)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ExamRow {
    id: Uuid,
    title: String,
    description: String,
    course: String,
    created_by: Uuid,
    duration: i32,
    questions: Json<Vec<Question>>,
    total_marks: i32,
    passing_marks: i32,
    scheduled_at: DateTime<Utc>,
    end_at: DateTime<Utc>,
    allowed_students: Vec<Uuid>,
    proctoring_settings: Json<ProctoringSettings>,
    settings: Json<ExamSettings>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<ExamRow> for Exam {
    fn from(row: ExamRow) -> Self {
        Exam {
            id: row.id,
            title: row.title,
            description: row.description,
            course: row.course,
            created_by: row.created_by,
            duration: row.duration.max(0) as u32,
            questions: row.questions.0,
            total_marks: row.total_marks.max(0) as u32,
            passing_marks: row.passing_marks.max(0) as u32,
            scheduled_at: row.scheduled_at,
            end_at: row.end_at,
            allowed_students: row.allowed_students,
            proctoring_settings: row.proctoring_settings.0,
            settings: row.settings.0,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct SessionRow {
    id: Uuid,
    exam_id: Uuid,
    student_id: Uuid,
    status: String,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    question_order: Json<Vec<u32>>,
    option_seed: i64,
    answers: Json<Vec<Answer>>,
    warning_count: i32,
    violation_ids: Vec<Uuid>,
    score: f64,
    total_questions: i32,
    correct_answers: i32,
    wrong_answers: i32,
    unanswered_questions: i32,
    percentage: f64,
    result: String,
    graded_at: Option<DateTime<Utc>>,
    can_view_answers: bool,
    version: i64,
}

impl TryFrom<SessionRow> for ExamSession {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::parse(&row.status).ok_or_else(|| {
            AppError::InternalServerError(format!("unknown session status '{}'", row.status))
        })?;
        let result = ResultStatus::parse(&row.result).ok_or_else(|| {
            AppError::InternalServerError(format!("unknown session result '{}'", row.result))
        })?;

        Ok(ExamSession {
            id: row.id,
            exam_id: row.exam_id,
            student_id: row.student_id,
            status,
            start_time: row.start_time,
            end_time: row.end_time,
            question_order: row.question_order.0,
            option_seed: row.option_seed as u64,
            answers: row.answers.0,
            warning_count: row.warning_count.max(0) as u32,
            violation_ids: row.violation_ids,
            score: row.score,
            total_questions: row.total_questions.max(0) as u32,
            correct_answers: row.correct_answers.max(0) as u32,
            wrong_answers: row.wrong_answers.max(0) as u32,
            unanswered_questions: row.unanswered_questions.max(0) as u32,
            percentage: row.percentage,
            result,
            graded_at: row.graded_at,
            can_view_answers: row.can_view_answers,
            version: row.version,
        })
    }
}

#[derive(FromRow)]
struct ViolationRow {
    id: Uuid,
    session_id: Uuid,
    violation_type: String,
    timestamp: DateTime<Utc>,
    snapshot: Option<String>,
    severity: String,
    metadata: Json<BTreeMap<String, String>>,
    description: Option<String>,
}

impl TryFrom<ViolationRow> for Violation {
    type Error = AppError;

    fn try_from(row: ViolationRow) -> Result<Self, Self::Error> {
        Ok(Violation {
            id: row.id,
            session_id: row.session_id,
            violation_type: ViolationType::parse(&row.violation_type).unwrap_or(ViolationType::Other),
            timestamp: row.timestamp,
            snapshot: row.snapshot,
            severity: Severity::parse(&row.severity).unwrap_or_default(),
            metadata: row.metadata.0,
            description: row.description,
        })
    }
}

fn sessions_from_rows(rows: Vec<SessionRow>) -> Result<Vec<ExamSession>, AppError> {
    rows.into_iter().map(ExamSession::try_from).collect()
}

#[async_trait]
impl Store for PgStore {
    async fn get_exam(&self, id: Uuid) -> Result<Option<Exam>, AppError> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "SELECT {} FROM exams WHERE id = $1",
            EXAM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Exam::from))
    }

    async fn insert_exam(&self, exam: Exam) -> Result<Exam, AppError> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            r#"
            INSERT INTO exams ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {}
            "#,
            EXAM_COLUMNS, EXAM_COLUMNS
        ))
        .bind(exam.id)
        .bind(&exam.title)
        .bind(&exam.description)
        .bind(&exam.course)
        .bind(exam.created_by)
        .bind(exam.duration as i32)
        .bind(Json(&exam.questions))
        .bind(exam.total_marks as i32)
        .bind(exam.passing_marks as i32)
        .bind(exam.scheduled_at)
        .bind(exam.end_at)
        .bind(&exam.allowed_students)
        .bind(Json(&exam.proctoring_settings))
        .bind(Json(&exam.settings))
        .bind(exam.is_active)
        .bind(exam.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert exam: {:?}", e);
            AppError::from(e)
        })?;

        Ok(row.into())
    }

    async fn set_exam_active(&self, id: Uuid, active: bool) -> Result<Option<Exam>, AppError> {
        let row = sqlx::query_as::<_, ExamRow>(&format!(
            "UPDATE exams SET is_active = $2 WHERE id = $1 RETURNING {}",
            EXAM_COLUMNS
        ))
        .bind(id)
        .bind(active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Exam::from))
    }

    async fn list_exams_for_student(&self, student_id: Uuid) -> Result<Vec<Exam>, AppError> {
        let rows = sqlx::query_as::<_, ExamRow>(&format!(
            r#"
            SELECT {} FROM exams
            WHERE is_active AND $1 = ANY(allowed_students)
            ORDER BY scheduled_at ASC
            "#,
            EXAM_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Exam::from).collect())
    }

    async fn list_exams_by_creator(&self, creator: Option<Uuid>) -> Result<Vec<Exam>, AppError> {
        let rows = sqlx::query_as::<_, ExamRow>(&format!(
            r#"
            SELECT {} FROM exams
            WHERE $1::uuid IS NULL OR created_by = $1
            ORDER BY created_at DESC
            "#,
            EXAM_COLUMNS
        ))
        .bind(creator)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Exam::from).collect())
    }

    async fn delete_exam_if_unreferenced(&self, id: Uuid) -> Result<DeleteOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM exams WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }

        let refs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM exam_sessions WHERE exam_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if refs > 0 {
            return Ok(DeleteOutcome::Referenced(refs as u64));
        }

        sqlx::query("DELETE FROM exams WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(DeleteOutcome::Deleted)
    }

    async fn insert_session_if_absent(&self, session: ExamSession) -> Result<InsertOutcome, AppError> {
        let inserted = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            INSERT INTO exam_sessions ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
            ON CONFLICT (exam_id, student_id) DO NOTHING
            RETURNING {}
            "#,
            SESSION_COLUMNS, SESSION_COLUMNS
        ))
        .bind(session.id)
        .bind(session.exam_id)
        .bind(session.student_id)
        .bind(session.status.as_str())
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(Json(&session.question_order))
        .bind(session.option_seed as i64)
        .bind(Json(&session.answers))
        .bind(session.warning_count as i32)
        .bind(&session.violation_ids)
        .bind(session.score)
        .bind(session.total_questions as i32)
        .bind(session.correct_answers as i32)
        .bind(session.wrong_answers as i32)
        .bind(session.unanswered_questions as i32)
        .bind(session.percentage)
        .bind(session.result.as_str())
        .bind(session.graded_at)
        .bind(session.can_view_answers)
        .bind(session.version)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(InsertOutcome::Created(row.try_into()?));
        }

        // Lost the race (or a session already existed): surface the winner.
        let existing = self
            .find_session(session.exam_id, session.student_id)
            .await?
            .ok_or_else(|| {
                AppError::InternalServerError(
                    "session insert conflicted but no existing session was found".to_string(),
                )
            })?;

        Ok(InsertOutcome::Existing(existing))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<ExamSession>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExamSession::try_from).transpose()
    }

    async fn find_session(&self, exam_id: Uuid, student_id: Uuid) -> Result<Option<ExamSession>, AppError> {
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE exam_id = $1 AND student_id = $2",
            SESSION_COLUMNS
        ))
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExamSession::try_from).transpose()
    }

    async fn list_sessions_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamSession>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE exam_id = $1 ORDER BY start_time DESC",
            SESSION_COLUMNS
        ))
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        sessions_from_rows(rows)
    }

    async fn list_sessions_for_student(&self, student_id: Uuid) -> Result<Vec<ExamSession>, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE student_id = $1 ORDER BY start_time DESC",
            SESSION_COLUMNS
        ))
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        sessions_from_rows(rows)
    }

    async fn update_session_if_current(&self, session: &ExamSession) -> Result<Option<ExamSession>, AppError> {
        // warning_count and violation_ids are owned by append_violation, which
        // bumps the version, so a stale write here can never clobber them.
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE exam_sessions SET
                status = $3,
                end_time = $4,
                answers = $5,
                score = $6,
                correct_answers = $7,
                wrong_answers = $8,
                unanswered_questions = $9,
                percentage = $10,
                result = $11,
                graded_at = $12,
                can_view_answers = $13,
                version = version + 1
            WHERE id = $1 AND version = $2 AND status = 'in-progress'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(session.id)
        .bind(session.version)
        .bind(session.status.as_str())
        .bind(session.end_time)
        .bind(Json(&session.answers))
        .bind(session.score)
        .bind(session.correct_answers as i32)
        .bind(session.wrong_answers as i32)
        .bind(session.unanswered_questions as i32)
        .bind(session.percentage)
        .bind(session.result.as_str())
        .bind(session.graded_at)
        .bind(session.can_view_answers)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ExamSession::try_from).transpose()
    }

    async fn append_violation(&self, violation: &Violation) -> Result<Option<ExamSession>, AppError> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here serializes against a concurrent terminal
        // transition of the same session.
        let row = sqlx::query_as::<_, SessionRow>(&format!(
            r#"
            UPDATE exam_sessions SET
                warning_count = warning_count + 1,
                violation_ids = array_append(violation_ids, $2),
                version = version + 1
            WHERE id = $1 AND status = 'in-progress'
            RETURNING {}
            "#,
            SESSION_COLUMNS
        ))
        .bind(violation.session_id)
        .bind(violation.id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        sqlx::query(&format!(
            "INSERT INTO violations ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            VIOLATION_COLUMNS
        ))
        .bind(violation.id)
        .bind(violation.session_id)
        .bind(violation.violation_type.as_str())
        .bind(violation.timestamp)
        .bind(&violation.snapshot)
        .bind(violation.severity.as_str())
        .bind(Json(&violation.metadata))
        .bind(&violation.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to append violation: {:?}", e);
            AppError::from(e)
        })?;

        tx.commit().await?;

        Ok(Some(row.try_into()?))
    }

    async fn delete_session_if_unreferenced(&self, id: Uuid) -> Result<DeleteOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM exam_sessions WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Ok(DeleteOutcome::NotFound);
        };
        if !SessionStatus::parse(&status).is_some_and(SessionStatus::is_terminal) {
            return Ok(DeleteOutcome::Active);
        }

        let refs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM violations WHERE session_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if refs > 0 {
            return Ok(DeleteOutcome::Referenced(refs as u64));
        }

        sqlx::query("DELETE FROM exam_sessions WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(DeleteOutcome::Deleted)
    }

    async fn list_violations(&self, session_id: Uuid) -> Result<Vec<Violation>, AppError> {
        let rows = sqlx::query_as::<_, ViolationRow>(&format!(
            "SELECT {} FROM violations WHERE session_id = $1 ORDER BY timestamp ASC",
            VIOLATION_COLUMNS
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Violation::try_from).collect()
    }
}
