use std::collections::HashMap;

use serde::Serialize;

use super::super::domain::{
    AnswerId, DetailedFeedback, GradingState, QuestionGroupId, QuestionId, QuestionType,
    ResolvedSession, Section,
};
use super::aggregate::{answers_by_question, is_correct, snapshot_groups, ScoringError};

/// Per-question breakdown shown next to a session's band summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionReview {
    pub question_id: QuestionId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<AnswerId>,
    pub user_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// Only set for objective questions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub max_score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    pub grading_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detailed_feedback: Option<DetailedFeedback>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupReview {
    pub group_id: QuestionGroupId,
    pub instruction: String,
    pub section: Section,
    pub question_type: QuestionType,
    pub questions: Vec<QuestionReview>,
}

/// Walk the session snapshot and pair each question with its answer and any grader feedback.
pub fn review_session(
    resolved: &ResolvedSession,
    feedback: &HashMap<AnswerId, DetailedFeedback>,
) -> Result<Vec<GroupReview>, ScoringError> {
    let answers = answers_by_question(resolved)?;
    let groups = snapshot_groups(resolved)?;

    let reviews = groups
        .into_iter()
        .map(|group| {
            let objective = group.group.section.is_objective();
            let questions = group
                .questions
                .iter()
                .map(|question| {
                    let answer = answers.get(&question.question.id).copied();
                    let grading = answer
                        .map(|answer| answer.grading.clone())
                        .unwrap_or(GradingState::NotRequired);
                    let score = if objective {
                        Some(if is_correct(question, answer, group) { 1.0 } else { 0.0 })
                    } else {
                        answer.and_then(|answer| answer.score)
                    };

                    QuestionReview {
                        question_id: question.question.id.clone(),
                        content: question.question.content.clone(),
                        answer_id: answer.map(|answer| answer.id.clone()),
                        user_answer: answer.map(|answer| answer.content.clone()),
                        correct_answer: question
                            .grading_key
                            .as_ref()
                            .map(|key| key.correct_answer.clone()),
                        is_correct: objective.then(|| is_correct(question, answer, group)),
                        score,
                        max_score: if objective {
                            1.0
                        } else {
                            question.question.max_score()
                        },
                        feedback: answer.and_then(|answer| answer.feedback.clone()),
                        grading_status: grading.label(),
                        detailed_feedback: answer
                            .and_then(|answer| feedback.get(&answer.id))
                            .cloned(),
                    }
                })
                .collect();

            GroupReview {
                group_id: group.group.id.clone(),
                instruction: group.group.instruction.clone(),
                section: group.group.section,
                question_type: group.group.question_type.clone(),
                questions,
            }
        })
        .collect();

    Ok(reviews)
}
