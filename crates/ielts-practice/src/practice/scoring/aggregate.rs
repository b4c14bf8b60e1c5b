use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::super::domain::{
    Answer, AnswerId, GradingKey, GradingState, QuestionGroupId, QuestionId, ResolvedGroup,
    ResolvedQuestion, ResolvedSession, Section, SessionId,
};
use super::bands::{raw_score_to_band, round_to_half_band};
use super::comparator::compare_answers;
use super::config::{PendingWritingPolicy, ScoringConfig};

/// Band summary for one practice session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub overall_band_score: f32,
    pub reading_band_score: f32,
    pub writing_band_score: f32,
    pub reading_correct: u32,
    pub reading_total: u32,
    pub writing_score: f32,
    /// Sum of the practiced writing questions' maximum scores. Fractional maximums carry through.
    pub writing_total: f32,
    pub total_questions: usize,
    /// Writing answers submitted but not yet graded.
    pub pending_grades: usize,
    /// Writing answers whose grading exhausted its retries.
    pub failed_grades: usize,
}

impl ScoreSummary {
    pub fn reading_practiced(&self) -> bool {
        self.reading_total > 0
    }

    pub fn writing_practiced(&self) -> bool {
        self.writing_total > 0.0
    }

    pub fn is_final(&self) -> bool {
        self.pending_grades == 0 && self.failed_grades == 0
    }
}

/// Structural data the aggregator needed but was not handed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MissingAssociation {
    #[error("question group {0} from the session snapshot was not resolved")]
    QuestionGroup(QuestionGroupId),
    #[error("answer {answer} belongs to session {found}, not {expected}")]
    ForeignAnswer {
        answer: AnswerId,
        expected: SessionId,
        found: SessionId,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScoringError {
    #[error("cannot score session: {0}")]
    MissingAssociation(#[from] MissingAssociation),
}

/// Score a session with the default configuration.
pub fn calculate_session_results(session: &ResolvedSession) -> Result<ScoreSummary, ScoringError> {
    ScoringEngine::default().summarize(session)
}

/// Stateless aggregator applying a scoring configuration to resolved sessions.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn summarize(&self, resolved: &ResolvedSession) -> Result<ScoreSummary, ScoringError> {
        let answers = answers_by_question(resolved)?;
        let groups = snapshot_groups(resolved)?;

        let mut reading = ReadingTally::default();
        let mut writing = WritingTally::default();
        let mut total_questions = 0;

        for group in groups {
            total_questions += group.questions.len();
            match group.group.section {
                Section::Reading => {
                    for question in &group.questions {
                        let answer = answers.get(&question.question.id).copied();
                        reading.record(is_correct(question, answer, group));
                    }
                }
                Section::Writing => {
                    for question in &group.questions {
                        let answer = answers.get(&question.question.id).copied();
                        writing.record(question, answer, self.config.pending_writing);
                    }
                }
            }
        }

        let reading_band = raw_score_to_band(reading.correct, reading.total);
        let writing_band = writing.band();

        let practiced: Vec<f32> = [
            (reading.total > 0).then_some(reading_band),
            (writing.total > 0.0).then_some(writing_band),
        ]
        .into_iter()
        .flatten()
        .collect();

        let overall_band_score = if practiced.is_empty() {
            0.0
        } else {
            let mean = practiced.iter().sum::<f32>() / practiced.len() as f32;
            round_to_half_band(mean)
        };

        Ok(ScoreSummary {
            overall_band_score,
            reading_band_score: reading_band,
            writing_band_score: writing_band,
            reading_correct: reading.correct,
            reading_total: reading.total,
            writing_score: writing.achieved,
            writing_total: writing.total,
            total_questions,
            pending_grades: writing.pending,
            failed_grades: writing.failed,
        })
    }
}

/// Correctness of one objective question under its group's comparison rule.
pub(crate) fn is_correct(
    question: &ResolvedQuestion,
    answer: Option<&Answer>,
    group: &ResolvedGroup,
) -> bool {
    compare_answers(
        answer.map(|answer| answer.content.as_str()),
        question
            .grading_key
            .as_ref()
            .and_then(GradingKey::comparable_answer),
        &group.group.question_type,
    )
}

/// Index answers by question, keeping the latest submission when a question was answered twice.
pub(crate) fn answers_by_question(
    resolved: &ResolvedSession,
) -> Result<HashMap<&QuestionId, &Answer>, MissingAssociation> {
    let mut answers: HashMap<&QuestionId, &Answer> = HashMap::new();
    for answer in &resolved.answers {
        if answer.session != resolved.session.id {
            return Err(MissingAssociation::ForeignAnswer {
                answer: answer.id.clone(),
                expected: resolved.session.id.clone(),
                found: answer.session.clone(),
            });
        }

        answers
            .entry(&answer.question)
            .and_modify(|existing| {
                if answer.submitted_at >= existing.submitted_at {
                    *existing = answer;
                }
            })
            .or_insert(answer);
    }
    Ok(answers)
}

/// Groups in snapshot order. Groups resolved but absent from the snapshot are ignored.
pub(crate) fn snapshot_groups(
    resolved: &ResolvedSession,
) -> Result<Vec<&ResolvedGroup>, MissingAssociation> {
    let by_id: HashMap<&QuestionGroupId, &ResolvedGroup> = resolved
        .groups
        .iter()
        .map(|group| (&group.group.id, group))
        .collect();

    resolved
        .session
        .question_groups
        .iter()
        .map(|id| {
            by_id
                .get(id)
                .copied()
                .ok_or_else(|| MissingAssociation::QuestionGroup(id.clone()))
        })
        .collect()
}

#[derive(Default)]
struct ReadingTally {
    correct: u32,
    total: u32,
}

impl ReadingTally {
    fn record(&mut self, correct: bool) {
        self.total += 1;
        if correct {
            self.correct += 1;
        }
    }
}

#[derive(Default)]
struct WritingTally {
    achieved: f32,
    total: f32,
    counted: u32,
    pending: usize,
    failed: usize,
}

impl WritingTally {
    fn record(
        &mut self,
        question: &ResolvedQuestion,
        answer: Option<&Answer>,
        policy: PendingWritingPolicy,
    ) {
        let max_score = question.question.max_score();

        if let Some(score) = answer.and_then(|answer| answer.score) {
            self.count(clamp_score(score, max_score), max_score);
            return;
        }

        let awaiting = match answer.map(|answer| &answer.grading) {
            Some(GradingState::Failed { .. }) => {
                self.failed += 1;
                true
            }
            Some(_) => {
                self.pending += 1;
                true
            }
            None => false,
        };

        if awaiting && policy == PendingWritingPolicy::Exclude {
            return;
        }
        self.count(0.0, max_score);
    }

    fn count(&mut self, score: f32, max_score: f32) {
        self.achieved += score;
        self.total += max_score;
        self.counted += 1;
    }

    /// The grader's score is already a band, so one question's band is its score.
    fn band(&self) -> f32 {
        if self.counted == 0 {
            0.0
        } else {
            self.achieved / self.counted as f32
        }
    }
}

fn clamp_score(score: f32, max_score: f32) -> f32 {
    if score.is_finite() {
        score.clamp(0.0, max_score)
    } else {
        0.0
    }
}
