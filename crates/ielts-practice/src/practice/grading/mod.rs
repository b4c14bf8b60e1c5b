//! Hand-off between answer submission and the external essay grader.
//!
//! Submission enqueues a [`GradingTask`] and returns immediately. A [`GradingWorker`] drains the
//! queue, calls the [`EssayGrader`] with bounded retries, and writes the result back through the
//! session repository. Results arrive out of band; the aggregator treats ungraded answers as
//! pending rather than failing.

mod dispatch;
mod worker;

use std::collections::BTreeMap;
use std::future::Future;

use serde::{Deserialize, Serialize};

use super::domain::{AnswerId, Criterion, CriterionFeedback};

pub use dispatch::{DispatchError, GradingDispatcher, GradingTask};
pub use worker::{GradeOutcome, GradingError, GradingWorker, RetryPolicy};

/// Everything the grader needs to score one essay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRequest {
    pub answer_id: AnswerId,
    pub prompt: String,
    pub essay: String,
    pub max_score: f32,
}

/// Result returned by the grader for one essay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EssayGrade {
    pub overall_score: f32,
    pub summary_feedback: String,
    #[serde(default)]
    pub criteria: BTreeMap<Criterion, CriterionFeedback>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraderError {
    #[error("grader transport failed: {0}")]
    Transport(String),
    #[error("grader returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("grader unavailable: {0}")]
    Unavailable(String),
}

impl GraderError {
    /// Transport hiccups and malformed model output are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraderError::Transport(_) | GraderError::InvalidResponse(_)
        )
    }
}

/// Outbound boundary to the AI essay scorer.
pub trait EssayGrader: Send + Sync + 'static {
    fn grade(
        &self,
        request: &GradingRequest,
    ) -> impl Future<Output = Result<EssayGrade, GraderError>> + Send;
}
