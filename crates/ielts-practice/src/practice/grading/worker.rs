use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use super::super::domain::{AnswerId, DetailedFeedback, GradingState, DEFAULT_MAX_SCORE};
use super::super::repository::{GradeRecord, RepositoryError, SessionRepository};
use super::dispatch::GradingTask;
use super::{EssayGrade, EssayGrader, GraderError, GradingRequest};

const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Bounded retry schedule for grader calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff doubles per retry and is capped here.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// What happened to one dequeued task.
#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    Graded { score: f32 },
    /// Redelivered task for an answer that already carries a grade, or a grade that lost the
    /// race against an earlier write.
    AlreadyGraded,
    Failed { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("answer {0} not found")]
    AnswerNotFound(AnswerId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Consumer side of the grading queue.
pub struct GradingWorker<S, G> {
    repository: Arc<S>,
    grader: Arc<G>,
    retry: RetryPolicy,
    max_in_flight: usize,
    claimed: Arc<Mutex<HashSet<AnswerId>>>,
}

impl<S, G> Clone for GradingWorker<S, G> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            grader: self.grader.clone(),
            retry: self.retry.clone(),
            max_in_flight: self.max_in_flight,
            claimed: self.claimed.clone(),
        }
    }
}

/// Marks an answer as being graded; released when the grading task ends.
struct Claim {
    answer_id: AnswerId,
    claimed: Arc<Mutex<HashSet<AnswerId>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        if let Ok(mut claimed) = self.claimed.lock() {
            claimed.remove(&self.answer_id);
        }
    }
}

impl<S, G> GradingWorker<S, G>
where
    S: SessionRepository + 'static,
    G: EssayGrader,
{
    pub fn new(repository: Arc<S>, grader: Arc<G>, retry: RetryPolicy) -> Self {
        Self {
            repository,
            grader,
            retry,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            claimed: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn spawn(self, receiver: mpsc::Receiver<GradingTask>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    /// Drain the queue until every dispatcher is dropped, grading up to `max_in_flight` answers
    /// at once. Answers are graded in no particular order; a task for an answer that is already
    /// being graded is dropped.
    pub async fn run(self, mut receiver: mpsc::Receiver<GradingTask>) {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut in_flight = JoinSet::new();

        while let Some(task) = receiver.recv().await {
            let Some(claim) = self.claim(&task.answer_id) else {
                info!(answer_id = %task.answer_id, "essay already being graded; skipping");
                continue;
            };
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let worker = self.clone();
            in_flight.spawn(async move {
                let _permit = permit;
                let _claim = claim;
                worker.handle(task).await;
            });
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        info!("grading queue closed; worker stopped");
    }

    fn claim(&self, answer_id: &AnswerId) -> Option<Claim> {
        let mut claimed = self
            .claimed
            .lock()
            .expect("grading claim mutex poisoned");
        claimed.insert(answer_id.clone()).then(|| Claim {
            answer_id: answer_id.clone(),
            claimed: self.claimed.clone(),
        })
    }

    async fn handle(&self, task: GradingTask) {
        match self.process(&task).await {
            Ok(GradeOutcome::Graded { score }) => {
                info!(answer_id = %task.answer_id, score, "essay graded");
            }
            Ok(GradeOutcome::AlreadyGraded) => {
                info!(answer_id = %task.answer_id, "essay already graded; skipping");
            }
            Ok(GradeOutcome::Failed { reason }) => {
                warn!(answer_id = %task.answer_id, %reason, "essay grading failed");
            }
            Err(err) => {
                error!(answer_id = %task.answer_id, error = %err, "unable to process grading task");
            }
        }
    }

    /// Grade one answer and persist the outcome. Safe to call more than once per answer.
    pub async fn process(&self, task: &GradingTask) -> Result<GradeOutcome, GradingError> {
        let answer = self
            .repository
            .fetch_answer(&task.answer_id)?
            .ok_or_else(|| GradingError::AnswerNotFound(task.answer_id.clone()))?;

        if answer.grading == GradingState::Graded {
            return Ok(GradeOutcome::AlreadyGraded);
        }

        let request = GradingRequest {
            answer_id: answer.id.clone(),
            prompt: task.prompt.clone(),
            essay: answer.content.clone(),
            max_score: task.max_score,
        };

        match self.grade_with_retry(&request).await {
            Ok(grade) => {
                let ceiling = if task.max_score.is_finite() && task.max_score > 0.0 {
                    task.max_score
                } else {
                    DEFAULT_MAX_SCORE
                };
                let score = grade.overall_score.clamp(0.0, ceiling);
                let recorded = self.repository.record_grade(
                    &answer.id,
                    GradeRecord {
                        score,
                        feedback: grade.summary_feedback,
                        detailed: DetailedFeedback {
                            answer: answer.id.clone(),
                            criteria: grade.criteria,
                        },
                    },
                )?;
                if recorded {
                    Ok(GradeOutcome::Graded { score })
                } else {
                    Ok(GradeOutcome::AlreadyGraded)
                }
            }
            Err(err) => {
                let reason = err.to_string();
                self.repository
                    .mark_grading_failed(&answer.id, reason.clone())?;
                Ok(GradeOutcome::Failed { reason })
            }
        }
    }

    async fn grade_with_retry(&self, request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut delay = self.retry.base_delay;
        let mut attempt = 1;

        loop {
            let result = self.grader.grade(request).await.and_then(validate_grade);
            match result {
                Ok(grade) => return Ok(grade),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        answer_id = %request.answer_id,
                        attempt,
                        max_attempts,
                        ?delay,
                        error = %err,
                        "grader call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, self.retry.max_delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn validate_grade(grade: EssayGrade) -> Result<EssayGrade, GraderError> {
    if grade.overall_score.is_finite() {
        Ok(grade)
    } else {
        Err(GraderError::InvalidResponse(
            "overall score is not a number".to_string(),
        ))
    }
}
