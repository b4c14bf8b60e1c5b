use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ceiling of the IELTS writing band, used when a question carries no explicit maximum.
pub const DEFAULT_MAX_SCORE: f32 = 9.0;

/// Identifier wrapper for practice sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Identifier wrapper for authored question groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionGroupId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnswerId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

macro_rules! display_id {
    ($($id:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $id {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }
        )+
    };
}

display_id!(SessionId, QuestionGroupId, QuestionId, AnswerId, UserId);

/// Exam section a question group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    Reading,
    Writing,
}

impl Section {
    pub const fn label(self) -> &'static str {
        match self {
            Section::Reading => "reading",
            Section::Writing => "writing",
        }
    }

    /// Reading items are graded by comparison, writing items by the external grader.
    pub const fn is_objective(self) -> bool {
        matches!(self, Section::Reading)
    }
}

/// Question type tag carried by a group; selects the comparison rule for its answers.
///
/// Unknown tags are preserved in `Other` so that content authored with newer types still scores
/// with the plain case-insensitive fallback instead of failing to load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestionType {
    TrueFalseNotGiven,
    FillInBlank,
    ShortAnswer,
    MultipleChoice,
    Essay,
    MatchParagraphs,
    Other(String),
}

impl QuestionType {
    pub fn as_str(&self) -> &str {
        match self {
            QuestionType::TrueFalseNotGiven => "true_false_ng",
            QuestionType::FillInBlank => "fill_in_blank",
            QuestionType::ShortAnswer => "short_answer",
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::Essay => "essay",
            QuestionType::MatchParagraphs => "match_paragraphs",
            QuestionType::Other(tag) => tag.as_str(),
        }
    }
}

impl From<&str> for QuestionType {
    fn from(value: &str) -> Self {
        match value.trim() {
            "true_false_ng" => QuestionType::TrueFalseNotGiven,
            "fill_in_blank" => QuestionType::FillInBlank,
            "short_answer" => QuestionType::ShortAnswer,
            "multiple_choice" | "mcq" => QuestionType::MultipleChoice,
            "essay" => QuestionType::Essay,
            "match_paragraphs" => QuestionType::MatchParagraphs,
            other => QuestionType::Other(other.to_string()),
        }
    }
}

impl From<String> for QuestionType {
    fn from(value: String) -> Self {
        QuestionType::from(value.as_str())
    }
}

impl From<QuestionType> for String {
    fn from(value: QuestionType) -> Self {
        value.as_str().to_string()
    }
}

/// Comparison hint stored alongside a grading key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringType {
    #[default]
    Exact,
    Keyword,
    TrueFalse,
    MultipleMatch,
    Manual,
}

/// Authoritative reference answer for one objective question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingKey {
    pub question: QuestionId,
    pub correct_answer: String,
    #[serde(default)]
    pub scoring_type: ScoringType,
}

impl GradingKey {
    /// Reference answer to hand to the comparator, or `None` for manually graded keys.
    pub fn comparable_answer(&self) -> Option<&str> {
        match self.scoring_type {
            ScoringType::Manual => None,
            _ => Some(self.correct_answer.as_str()),
        }
    }
}

/// Authored group of questions sharing one instruction, section, and type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionGroup {
    pub id: QuestionGroupId,
    pub instruction: String,
    pub section: Section,
    pub question_type: QuestionType,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub group: QuestionGroupId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f32>,
}

impl Question {
    pub fn max_score(&self) -> f32 {
        self.max_score
            .filter(|score| score.is_finite() && *score > 0.0)
            .unwrap_or(DEFAULT_MAX_SCORE)
    }
}

/// A practice attempt. `question_groups` is the snapshot frozen when the session was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: SessionId,
    pub user: UserId,
    pub question_groups: Vec<QuestionGroupId>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl PracticeSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.user == user
    }
}

/// Lifecycle of the external grading step attached to an answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GradingState {
    /// Objective answers are graded synchronously at submission.
    #[default]
    NotRequired,
    Pending,
    Graded,
    Failed { reason: String },
}

impl GradingState {
    pub const fn label(&self) -> &'static str {
        match self {
            GradingState::NotRequired => "not_required",
            GradingState::Pending => "pending",
            GradingState::Graded => "graded",
            GradingState::Failed { .. } => "failed",
        }
    }

    pub fn is_awaiting_grade(&self) -> bool {
        matches!(self, GradingState::Pending | GradingState::Failed { .. })
    }
}

/// One user's submission for one question within one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub session: SessionId,
    pub question: QuestionId,
    pub user: UserId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub grading: GradingState,
    pub submitted_at: DateTime<Utc>,
}

/// Official IELTS writing criteria reported by the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    TaskAchievement,
    CoherenceAndCohesion,
    LexicalResource,
    GrammaticalRangeAndAccuracy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionFeedback {
    pub score: f32,
    pub feedback: String,
}

/// Criterion breakdown attached to a graded free-response answer. Absence means "not yet graded".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedFeedback {
    pub answer: AnswerId,
    pub criteria: BTreeMap<Criterion, CriterionFeedback>,
}

/// Question with its grading key resolved by the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedQuestion {
    #[serde(flatten)]
    pub question: Question,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grading_key: Option<GradingKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedGroup {
    #[serde(flatten)]
    pub group: QuestionGroup,
    pub questions: Vec<ResolvedQuestion>,
}

/// Fully populated input to the aggregator: the session plus every association it scores against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSession {
    pub session: PracticeSession,
    pub groups: Vec<ResolvedGroup>,
    #[serde(default)]
    pub answers: Vec<Answer>,
}
