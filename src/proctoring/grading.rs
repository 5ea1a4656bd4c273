// src/proctoring/grading.rs

//! Deterministic scoring of a session's answers against the exam key.

use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{
    exam::{NegativeMarking, Question},
    session::{Answer, ResultStatus},
};

/// Output of one grading pass.
#[derive(Debug, Clone, PartialEq)]
pub struct GradeReport {
    pub answers: Vec<Answer>,
    pub score: f64,
    pub percentage: f64,
    pub result: ResultStatus,
    pub correct: u32,
    pub wrong: u32,
    pub unanswered: u32,
}

/// Grades `answers` against `questions`.
///
/// * An answer whose question no longer exists is passed through ungraded
///   (`is_correct = None`, 0 marks) and counts as neither correct nor wrong.
/// * Wrong answers cost `negative_marking.deduction` when enabled.
/// * Only the final sum is clamped at zero.
/// * `result` is `Pass` when `score >= passing_marks`.
pub fn grade(
    answers: &[Answer],
    questions: &[Question],
    negative_marking: NegativeMarking,
    total_marks: u32,
    passing_marks: u32,
    total_questions: u32,
) -> GradeReport {
    let key: HashMap<Uuid, &Question> = questions.iter().map(|q| (q.id, q)).collect();

    let mut raw_total = 0.0_f64;
    let mut correct = 0_u32;
    let mut wrong = 0_u32;

    let graded: Vec<Answer> = answers
        .iter()
        .map(|answer| {
            let Some(question) = key.get(&answer.question_id) else {
                return Answer {
                    is_correct: None,
                    marks_awarded: 0.0,
                    ..answer.clone()
                };
            };

            let is_correct = answer.selected_option == question.correct_answer;
            let marks_awarded = if is_correct {
                correct += 1;
                f64::from(question.marks)
            } else {
                wrong += 1;
                if negative_marking.enabled {
                    -negative_marking.deduction
                } else {
                    0.0
                }
            };
            raw_total += marks_awarded;

            Answer {
                question_id: answer.question_id,
                selected_option: answer.selected_option,
                is_correct: Some(is_correct),
                marks_awarded,
                time_spent: answer.time_spent,
            }
        })
        .collect();

    let score = raw_total.max(0.0);
    let percentage = if total_marks == 0 {
        0.0
    } else {
        (score / f64::from(total_marks) * 100.0).clamp(0.0, 100.0)
    };
    let result = if score >= f64::from(passing_marks) {
        ResultStatus::Pass
    } else {
        ResultStatus::Fail
    };
    let unanswered = total_questions.saturating_sub(answers.len() as u32);

    GradeReport {
        answers: graded,
        score,
        percentage,
        result,
        correct,
        wrong,
        unanswered,
    }
}

/// Percentage formatted the way results are presented (two decimals).
pub fn round_percentage(percentage: f64) -> f64 {
    (percentage * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn questions(n: usize, marks: u32) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: Uuid::new_v4(),
                question_text: format!("Question {}", i),
                options: vec!["A".into(), "B".into(), "C".into(), "D".into()],
                correct_answer: 0,
                marks,
                explanation: None,
                image: None,
            })
            .collect()
    }

    fn answer(q: &Question, selected: u32) -> Answer {
        Answer {
            question_id: q.id,
            selected_option: selected,
            is_correct: None,
            marks_awarded: 0.0,
            time_spent: 10,
        }
    }

    fn answer_sheet(qs: &[Question], correct: usize, wrong: usize) -> Vec<Answer> {
        qs.iter()
            .take(correct)
            .map(|q| answer(q, 0))
            .chain(qs.iter().skip(correct).take(wrong).map(|q| answer(q, 1)))
            .collect()
    }

    #[test]
    fn six_of_ten_passes_at_sixty_percent() {
        let qs = questions(10, 1);
        let answers = answer_sheet(&qs, 6, 4);
        let report = grade(&answers, &qs, NegativeMarking::default(), 10, 6, 10);
        assert_eq!(report.score, 6.0);
        assert_eq!(round_percentage(report.percentage), 60.0);
        assert_eq!(report.result, ResultStatus::Pass);
        assert_eq!(report.correct, 6);
        assert_eq!(report.wrong, 4);
        assert_eq!(report.unanswered, 0);
    }

    #[test]
    fn negative_marking_is_not_clamped_when_net_positive() {
        let qs = questions(8, 1);
        let answers = answer_sheet(&qs, 5, 3);
        let nm = NegativeMarking {
            enabled: true,
            deduction: 0.25,
        };
        let report = grade(&answers, &qs, nm, 8, 4, 8);
        assert_eq!(report.score, 4.25);
        assert_eq!(report.answers[5].marks_awarded, -0.25);
        assert_eq!(report.unanswered, 0);
    }

    #[test]
    fn net_negative_score_clamps_to_zero() {
        let qs = questions(4, 1);
        let answers = answer_sheet(&qs, 0, 4);
        let nm = NegativeMarking {
            enabled: true,
            deduction: 1.0,
        };
        let report = grade(&answers, &qs, nm, 4, 1, 4);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.percentage, 0.0);
        assert_eq!(report.result, ResultStatus::Fail);
    }

    #[test]
    fn score_equal_to_passing_marks_passes() {
        let qs = questions(5, 2);
        let answers = answer_sheet(&qs, 3, 0);
        let report = grade(&answers, &qs, NegativeMarking::default(), 10, 6, 5);
        assert_eq!(report.score, 6.0);
        assert_eq!(report.result, ResultStatus::Pass);
        assert_eq!(report.unanswered, 2);
    }

    #[test]
    fn empty_submission_fails_with_everything_unanswered() {
        let qs = questions(10, 1);
        let report = grade(&[], &qs, NegativeMarking::default(), 10, 6, 10);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.unanswered, 10);
        assert_eq!(report.result, ResultStatus::Fail);
    }

    #[test]
    fn answer_for_missing_question_is_passed_through() {
        let qs = questions(3, 1);
        let mut answers = answer_sheet(&qs, 2, 0);
        let orphan = Answer {
            question_id: Uuid::new_v4(),
            selected_option: 0,
            is_correct: None,
            marks_awarded: 0.0,
            time_spent: 3,
        };
        answers.push(orphan.clone());
        let report = grade(&answers, &qs, NegativeMarking::default(), 3, 2, 3);
        assert_eq!(report.score, 2.0);
        assert_eq!(report.correct, 2);
        assert_eq!(report.wrong, 0);
        assert_eq!(report.answers[2], orphan);
        assert_eq!(report.result, ResultStatus::Pass);
    }

    #[test]
    fn grading_is_deterministic() {
        let qs = questions(7, 3);
        let answers = answer_sheet(&qs, 4, 2);
        let nm = NegativeMarking {
            enabled: true,
            deduction: 0.5,
        };
        let first = grade(&answers, &qs, nm, 21, 10, 7);
        for _ in 0..10 {
            assert_eq!(grade(&answers, &qs, nm, 21, 10, 7), first);
        }
    }
}
