// src/models/exam.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    config::{DEFAULT_NEGATIVE_DEDUCTION, DEFAULT_WARNING_THRESHOLD, MAX_WARNING_THRESHOLD},
    error::AppError,
    utils::html::clean_html,
};

/// A single multiple-choice question inside an exam definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: Uuid,
    pub question_text: String,
    /// At least two options; answers refer to them by index.
    pub options: Vec<String>,
    /// Index into `options`. Never sent to students.
    pub correct_answer: u32,
    pub marks: u32,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Proctoring policy enforced by the attention monitor and the session core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProctoringSettings {
    pub enable_face_detection: bool,
    pub enable_multiple_face_detection: bool,
    pub enable_head_movement: bool,
    pub enable_tab_switch: bool,
    /// Number of logged violations at which the session is auto-submitted.
    pub warning_threshold: u32,
}

impl Default for ProctoringSettings {
    fn default() -> Self {
        Self {
            enable_face_detection: true,
            enable_multiple_face_detection: true,
            enable_head_movement: true,
            enable_tab_switch: true,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct NegativeMarking {
    pub enabled: bool,
    pub deduction: f64,
}

impl Default for NegativeMarking {
    fn default() -> Self {
        Self {
            enabled: false,
            deduction: DEFAULT_NEGATIVE_DEDUCTION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ExamSettings {
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
    pub show_results_immediately: bool,
    pub negative_marking: NegativeMarking,
}

impl Default for ExamSettings {
    fn default() -> Self {
        Self {
            shuffle_questions: false,
            shuffle_options: false,
            show_results_immediately: true,
            negative_marking: NegativeMarking::default(),
        }
    }
}

/// An exam definition as held by the catalog.
///
/// Read-only for the session core; `total_marks` is always derived from the
/// questions and `passing_marks` never exceeds it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub course: String,
    pub created_by: Uuid,
    /// Duration in minutes.
    pub duration: u32,
    pub questions: Vec<Question>,
    pub total_marks: u32,
    pub passing_marks: u32,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub allowed_students: Vec<Uuid>,
    pub proctoring_settings: ProctoringSettings,
    pub settings: ExamSettings,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Where `now` falls relative to an exam's schedule window.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExamWindow {
    Upcoming,
    Ongoing,
    Ended,
}

impl Exam {
    pub fn is_allowed(&self, student_id: Uuid) -> bool {
        self.allowed_students.contains(&student_id)
    }

    /// The window is inclusive on both ends.
    pub fn window_at(&self, now: DateTime<Utc>) -> ExamWindow {
        if now < self.scheduled_at {
            ExamWindow::Upcoming
        } else if now > self.end_at {
            ExamWindow::Ended
        } else {
            ExamWindow::Ongoing
        }
    }

    pub fn question(&self, id: Uuid) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    pub fn warning_threshold(&self) -> u32 {
        self.proctoring_settings.warning_threshold.max(1)
    }
}

/// DTO for authoring a question.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = validate_correct_answer))]
pub struct CreateQuestionRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question_text: String,
    #[validate(custom(function = validate_options))]
    pub options: Vec<String>,
    pub correct_answer: i64,
    /// Missing or non-positive marks default to 1.
    #[validate(range(max = 1000))]
    pub marks: Option<i64>,
    #[validate(length(max = 2000))]
    pub explanation: Option<String>,
    #[validate(length(max = 2048))]
    pub image: Option<String>,
}

fn validate_options(options: &[String]) -> Result<(), ValidationError> {
    if options.len() < 2 {
        return Err(ValidationError::new("at_least_two_options_required"));
    }
    for opt in options {
        if opt.trim().is_empty() {
            return Err(ValidationError::new("option_cannot_be_empty"));
        }
        if opt.len() > 500 {
            return Err(ValidationError::new("option_too_long"));
        }
    }
    Ok(())
}

fn validate_correct_answer(req: &CreateQuestionRequest) -> Result<(), ValidationError> {
    if req.correct_answer < 0 || req.correct_answer as usize >= req.options.len() {
        return Err(ValidationError::new("invalid_correct_answer_index"));
    }
    Ok(())
}

/// DTO for creating an exam.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateExamRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub course: String,
    #[validate(range(min = 1, max = 1440))]
    pub duration: u32,
    #[validate(range(min = 0))]
    pub passing_marks: i64,
    #[validate(nested)]
    pub questions: Vec<CreateQuestionRequest>,
    #[serde(alias = "scheduledDate")]
    pub scheduled_at: DateTime<Utc>,
    #[serde(alias = "endDate")]
    pub end_at: DateTime<Utc>,
    #[serde(default)]
    pub allowed_students: Vec<Uuid>,
    #[serde(default)]
    pub proctoring_settings: Option<ProctoringSettings>,
    #[serde(default)]
    pub settings: Option<ExamSettings>,
}

impl CreateExamRequest {
    /// Builds the catalog record, deriving total marks and checking the
    /// cross-field rules the derive macros cannot express.
    pub fn into_exam(self, created_by: Uuid, now: DateTime<Utc>) -> Result<Exam, AppError> {
        self.validate()?;

        if self.questions.is_empty() {
            return Err(AppError::BadRequest(
                "At least one question is required".to_string(),
            ));
        }

        if self.end_at <= self.scheduled_at {
            return Err(AppError::BadRequest(
                "End date must be after scheduled date".to_string(),
            ));
        }

        let proctoring_settings = self.proctoring_settings.unwrap_or_default();
        if proctoring_settings.warning_threshold < 1
            || proctoring_settings.warning_threshold > MAX_WARNING_THRESHOLD
        {
            return Err(AppError::BadRequest(format!(
                "Warning threshold must be between 1 and {}",
                MAX_WARNING_THRESHOLD
            )));
        }

        let settings = self.settings.unwrap_or_default();
        if settings.negative_marking.deduction < 0.0 || !settings.negative_marking.deduction.is_finite() {
            return Err(AppError::BadRequest(
                "Negative marking deduction cannot be negative".to_string(),
            ));
        }

        let questions: Vec<Question> = self
            .questions
            .into_iter()
            .map(|q| Question {
                id: Uuid::new_v4(),
                question_text: clean_html(q.question_text.trim()),
                options: q.options.iter().map(|o| clean_html(o.trim())).collect(),
                correct_answer: q.correct_answer as u32,
                marks: q.marks.filter(|m| *m >= 1).map(|m| m as u32).unwrap_or(1),
                explanation: q.explanation.map(|e| clean_html(e.trim())),
                image: q.image,
            })
            .collect();

        let total_marks = questions
            .iter()
            .try_fold(0u32, |acc, q| acc.checked_add(q.marks))
            .filter(|total| i32::try_from(*total).is_ok())
            .ok_or_else(|| AppError::BadRequest("Total marks are too large".to_string()))?;
        let passing_marks = self.passing_marks as u32;
        if self.passing_marks > i64::from(total_marks) {
            return Err(AppError::BadRequest(format!(
                "Passing marks ({}) cannot exceed total marks ({})",
                passing_marks, total_marks
            )));
        }

        let mut allowed_students = self.allowed_students;
        allowed_students.sort();
        allowed_students.dedup();

        Ok(Exam {
            id: Uuid::new_v4(),
            title: clean_html(self.title.trim()),
            description: self.description.map(|d| clean_html(d.trim())).unwrap_or_default(),
            course: clean_html(self.course.trim()),
            created_by,
            duration: self.duration,
            questions,
            total_marks,
            passing_marks,
            scheduled_at: self.scheduled_at,
            end_at: self.end_at,
            allowed_students,
            proctoring_settings,
            settings,
            is_active: true,
            created_at: now,
        })
    }
}

/// Exam listing entry shown to a student.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentExamSummary {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub course: String,
    pub duration: u32,
    pub total_marks: u32,
    pub passing_marks: u32,
    pub scheduled_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub total_questions: usize,
    pub proctoring_settings: ProctoringSettings,
    pub status: ExamWindow,
    pub attempted: bool,
    pub session_id: Option<Uuid>,
    pub session_status: Option<crate::models::session::SessionStatus>,
    pub score: Option<f64>,
}
