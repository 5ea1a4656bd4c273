// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::exam::ProctoringSettings;

/// Lifecycle of one attempt. Every state other than `InProgress` is absorbing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    AutoSubmitted,
    Terminated,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in-progress",
            SessionStatus::Completed => "completed",
            SessionStatus::AutoSubmitted => "auto-submitted",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "in-progress" => Some(SessionStatus::InProgress),
            "completed" => Some(SessionStatus::Completed),
            "auto-submitted" => Some(SessionStatus::AutoSubmitted),
            "terminated" => Some(SessionStatus::Terminated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Pass,
    Fail,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Pass => "pass",
            ResultStatus::Fail => "fail",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ResultStatus::Pending),
            "pass" => Some(ResultStatus::Pass),
            "fail" => Some(ResultStatus::Fail),
            _ => None,
        }
    }
}

/// A saved answer. `selected_option` is always the canonical option index,
/// independent of any option shuffling shown to the student.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: Uuid,
    pub selected_option: u32,
    /// `None` until graded, and stays `None` if the question disappeared.
    #[serde(default)]
    pub is_correct: Option<bool>,
    #[serde(default)]
    pub marks_awarded: f64,
    /// Seconds the student spent on the question.
    #[serde(default)]
    pub time_spent: u32,
}

/// One student's single attempt at one exam.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub question_order: Vec<u32>,
    /// Seeds the per-question option permutation. Server-side only.
    #[serde(skip_serializing)]
    pub option_seed: u64,
    pub answers: Vec<Answer>,
    pub warning_count: u32,
    pub violation_ids: Vec<Uuid>,
    pub score: f64,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub unanswered_questions: u32,
    pub percentage: f64,
    pub result: ResultStatus,
    pub graded_at: Option<DateTime<Utc>>,
    pub can_view_answers: bool,
    /// Bumped on every write; conditional updates compare against it.
    #[serde(skip_serializing)]
    pub version: i64,
}

impl ExamSession {
    /// A fresh in-progress session, not yet persisted.
    pub fn new(
        exam_id: Uuid,
        student_id: Uuid,
        question_order: Vec<u32>,
        option_seed: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let total_questions = question_order.len() as u32;
        Self {
            id: Uuid::new_v4(),
            exam_id,
            student_id,
            status: SessionStatus::InProgress,
            start_time: now,
            end_time: None,
            question_order,
            option_seed,
            answers: Vec::new(),
            warning_count: 0,
            violation_ids: Vec::new(),
            score: 0.0,
            total_questions,
            correct_answers: 0,
            wrong_answers: 0,
            unanswered_questions: 0,
            percentage: 0.0,
            result: ResultStatus::Pending,
            graded_at: None,
            can_view_answers: false,
            version: 0,
        }
    }

    /// Replaces any previous answer for the same question.
    pub fn upsert_answer(&mut self, answer: Answer) {
        match self
            .answers
            .iter_mut()
            .find(|a| a.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
    }
}

/// Why a submission is being made.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitReason {
    #[default]
    Manual,
    /// The client-side countdown reached zero.
    TimeExpired,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAnswerRequest {
    pub question_id: Uuid,
    /// Option index as displayed to the student.
    pub selected_option: i64,
    #[serde(default)]
    pub time_spent: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExamRequest {
    #[serde(default)]
    pub reason: SubmitReason,
}

/// Question as transmitted to a student: no correct answer, no explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayQuestion {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub question_number: u32,
    pub question_text: String,
    pub options: Vec<String>,
    pub marks: u32,
    pub image: Option<String>,
}

/// A saved answer re-expressed in the option order the student sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayAnswer {
    pub question_id: Uuid,
    pub selected_option: u32,
    pub time_spent: u32,
}

/// Compact session row for faculty listings and history.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistoryEntry {
    pub session_id: Uuid,
    pub exam_id: Uuid,
    pub exam_title: String,
    pub course: String,
    pub status: SessionStatus,
    pub score: f64,
    pub total_marks: u32,
    pub percentage: f64,
    pub result: ResultStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub warning_count: u32,
    pub violation_count: usize,
}

/// Exam metadata sent alongside the projected questions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamMeta {
    pub title: String,
    pub duration: u32,
    pub total_marks: u32,
    pub total_questions: usize,
    pub proctoring_settings: ProctoringSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsResponse {
    pub exam: ExamMeta,
    pub questions: Vec<DisplayQuestion>,
    /// Saved answers, in displayed option indices.
    pub current_answers: Vec<DisplayAnswer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSaved {
    pub message: String,
    pub answered_count: usize,
    pub total_questions: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedSession {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub status: SessionStatus,
    pub end_time: Option<DateTime<Utc>>,
    pub score: f64,
    pub percentage: f64,
    pub result: ResultStatus,
}

/// Score breakdown included when the exam shows results immediately.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub score: f64,
    pub total_marks: u32,
    pub percentage: f64,
    pub result: ResultStatus,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub unanswered_questions: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitExamResponse {
    pub message: String,
    pub session: SubmittedSession,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ScoreBreakdown>,
}

/// Per-answer review line, only produced when answers may be viewed.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReview {
    pub question_text: String,
    pub selected_option: Option<u32>,
    pub selected_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub marks_awarded: f64,
    pub explanation: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsView {
    pub exam_title: String,
    pub status: SessionStatus,
    pub score: f64,
    pub total_marks: u32,
    pub passing_marks: u32,
    pub percentage: f64,
    pub result: ResultStatus,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub unanswered_questions: u32,
    pub total_questions: u32,
    pub warning_count: u32,
    pub violation_count: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Whole minutes between start and end.
    pub time_taken: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<Vec<AnswerReview>>,
}

/// Aggregates over all sessions of one exam.
#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub auto_submitted: usize,
    pub terminated: usize,
    /// Mean score over graded sessions.
    pub average_score: f64,
    /// Percentage of graded sessions that passed.
    pub pass_rate: f64,
}

impl SessionStats {
    pub fn from_sessions(sessions: &[ExamSession]) -> Self {
        let mut stats = SessionStats {
            total: sessions.len(),
            ..Default::default()
        };
        let mut graded = 0_usize;
        let mut passed = 0_usize;
        let mut score_sum = 0.0_f64;

        for session in sessions {
            match session.status {
                SessionStatus::InProgress => stats.in_progress += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::AutoSubmitted => stats.auto_submitted += 1,
                SessionStatus::Terminated => stats.terminated += 1,
            }
            if session.result != ResultStatus::Pending {
                graded += 1;
                score_sum += session.score;
                if session.result == ResultStatus::Pass {
                    passed += 1;
                }
            }
        }

        if graded > 0 {
            stats.average_score = score_sum / graded as f64;
            stats.pass_rate = passed as f64 / graded as f64 * 100.0;
        }
        stats
    }
}
