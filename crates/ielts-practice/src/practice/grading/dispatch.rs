use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use super::super::domain::AnswerId;

/// Queue message asking for one answer to be graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingTask {
    pub answer_id: AnswerId,
    pub prompt: String,
    pub max_score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("grading queue is closed")]
    QueueClosed,
    #[error("grading queue is full")]
    QueueFull,
}

/// Sending half of the grading queue. Cloned into every submitter.
#[derive(Debug, Clone)]
pub struct GradingDispatcher {
    sender: mpsc::Sender<GradingTask>,
}

impl GradingDispatcher {
    /// Build a bounded queue, returning the dispatcher and the receiver for a worker.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<GradingTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueue a task without waiting for it to be graded.
    pub fn dispatch(&self, task: GradingTask) -> Result<(), DispatchError> {
        let answer_id = task.answer_id.clone();
        self.sender.try_send(task).map_err(|err| match err {
            TrySendError::Full(_) => DispatchError::QueueFull,
            TrySendError::Closed(_) => DispatchError::QueueClosed,
        })?;
        debug!(%answer_id, "grading task queued");
        Ok(())
    }
}
