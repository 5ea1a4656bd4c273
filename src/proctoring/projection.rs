// src/proctoring/projection.rs

//! Projection of an exam's questions into the order and option layout a
//! particular session sees.
//!
//! The display-to-canonical option mapping is derived from the session's
//! `option_seed`, so it is stable across requests and never has to leave the
//! server. Answers are always stored in canonical option indices.

use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        session::{Answer, DisplayAnswer, DisplayQuestion, ExamSession},
    },
};

/// Identity permutation of `count` question indices, shuffled uniformly
/// (Fisher–Yates) when `shuffle` is set.
pub fn question_order<R: Rng + ?Sized>(count: usize, shuffle: bool, rng: &mut R) -> Vec<u32> {
    let mut order: Vec<u32> = (0..count as u32).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}

/// `perm[display_index] == canonical_index` for one question's options.
pub fn option_permutation(seed: u64, question_index: u32, option_count: usize) -> Vec<u32> {
    let mut perm: Vec<u32> = (0..option_count as u32).collect();
    let mixed = seed ^ u64::from(question_index).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut rng = StdRng::seed_from_u64(mixed);
    perm.shuffle(&mut rng);
    perm
}

/// The server-held mapping for one displayed question.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionMapping {
    pub question_id: Uuid,
    pub option_count: usize,
    /// `None` means options are shown in canonical order.
    pub display_to_canonical: Option<Vec<u32>>,
}

impl OptionMapping {
    fn new(question_id: Uuid, option_count: usize, perm: Option<Vec<u32>>) -> Self {
        Self {
            question_id,
            option_count,
            display_to_canonical: perm,
        }
    }

    pub fn to_canonical(&self, display: u32) -> Option<u32> {
        if display as usize >= self.option_count {
            return None;
        }
        match &self.display_to_canonical {
            Some(perm) => perm.get(display as usize).copied(),
            None => Some(display),
        }
    }

    pub fn to_display(&self, canonical: u32) -> Option<u32> {
        if canonical as usize >= self.option_count {
            return None;
        }
        match &self.display_to_canonical {
            Some(perm) => perm.iter().position(|c| *c == canonical).map(|p| p as u32),
            None => Some(canonical),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Projection {
    pub questions: Vec<DisplayQuestion>,
    pub mappings: Vec<OptionMapping>,
}

/// Projects the exam through the session's question order, stripping the
/// answer key and explanations.
pub fn project(exam: &Exam, session: &ExamSession) -> Projection {
    let shuffle_options = exam.settings.shuffle_options;
    let mut questions = Vec::with_capacity(session.question_order.len());
    let mut mappings = Vec::with_capacity(session.question_order.len());

    for &canonical_index in &session.question_order {
        let Some(question) = exam.questions.get(canonical_index as usize) else {
            continue;
        };

        let perm = shuffle_options
            .then(|| option_permutation(session.option_seed, canonical_index, question.options.len()));

        let options = match &perm {
            Some(perm) => perm
                .iter()
                .map(|&c| question.options[c as usize].clone())
                .collect(),
            None => question.options.clone(),
        };

        questions.push(DisplayQuestion {
            id: question.id,
            question_number: questions.len() as u32 + 1,
            question_text: question.question_text.clone(),
            options,
            marks: question.marks,
            image: question.image.clone(),
        });
        mappings.push(OptionMapping::new(question.id, question.options.len(), perm));
    }

    Projection { questions, mappings }
}

/// Mapping for a single question of the session, if it belongs to it.
pub fn mapping_for(exam: &Exam, session: &ExamSession, question_id: Uuid) -> Option<OptionMapping> {
    let canonical_index = exam.questions.iter().position(|q| q.id == question_id)?;
    if !session.question_order.contains(&(canonical_index as u32)) {
        return None;
    }
    let question = &exam.questions[canonical_index];
    let perm = exam.settings.shuffle_options.then(|| {
        option_permutation(session.option_seed, canonical_index as u32, question.options.len())
    });
    Some(OptionMapping::new(question_id, question.options.len(), perm))
}

/// Translates a student's displayed choice into the canonical option index.
pub fn canonical_option(
    exam: &Exam,
    session: &ExamSession,
    question_id: Uuid,
    display_option: i64,
) -> Result<u32, AppError> {
    let mapping = mapping_for(exam, session, question_id)
        .ok_or_else(|| AppError::NotFound("Question not found in this exam".to_string()))?;

    if display_option < 0 {
        return Err(AppError::BadRequest("Invalid answer selection".to_string()));
    }

    mapping
        .to_canonical(display_option as u32)
        .ok_or_else(|| AppError::BadRequest("Invalid answer selection".to_string()))
}

/// Saved answers re-expressed in display option indices, for resume.
pub fn display_answers(projection: &Projection, answers: &[Answer]) -> Vec<DisplayAnswer> {
    answers
        .iter()
        .filter_map(|a| {
            let mapping = projection
                .mappings
                .iter()
                .find(|m| m.question_id == a.question_id)?;
            Some(DisplayAnswer {
                question_id: a.question_id,
                selected_option: mapping.to_display(a.selected_option)?,
                time_spent: a.time_spent,
            })
        })
        .collect()
}
