use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::domain::{
    Answer, AnswerId, GradingKey, GradingState, PracticeSession, Question, QuestionGroup,
    QuestionGroupId, QuestionId, QuestionType, ResolvedGroup, ResolvedQuestion, ResolvedSession,
    SessionId, UserId,
};
use super::grading::{DispatchError, GradingDispatcher, GradingTask};
use super::repository::{
    ContentRepository, RepositoryError, SessionQuery, SessionRepository, SortOrder,
};
use super::scoring::{
    compare_answers, review_session, GroupReview, ScoreSummary, ScoringEngine, ScoringError,
};

const DEFAULT_PAGE_SIZE: usize = 10;
const MAX_PAGE_SIZE: usize = 100;

static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);
static ANSWER_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    let id = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SessionId(format!("ses-{id:06}"))
}

fn next_answer_id() -> AnswerId {
    let id = ANSWER_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AnswerId(format!("ans-{id:06}"))
}

/// One answer posted against an open session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: QuestionId,
    pub content: String,
}

/// Whole test submitted in one request: the group snapshot and answers keyed by question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PracticeSubmission {
    pub question_group_ids: Vec<QuestionGroupId>,
    #[serde(default)]
    pub answers: BTreeMap<QuestionId, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub session_id: SessionId,
    pub answers_recorded: usize,
    pub grading_dispatched: usize,
}

/// Paging controls for the results listing. Pages are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResultsQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupLabel {
    pub id: QuestionGroupId,
    pub instruction: String,
    pub question_type: QuestionType,
}

/// Row of the results listing: session metadata next to its computed summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionListing {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: ScoreSummary,
    pub question_groups: Vec<GroupLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_count: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub limit: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultsPage {
    pub sessions: Vec<SessionListing>,
    pub pagination: Pagination,
}

/// Detailed results for a single session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResults {
    pub session: PracticeSession,
    pub summary: ScoreSummary,
    pub groups: Vec<GroupReview>,
}

/// Service composing content and session storage, the scoring engine, and grading dispatch.
pub struct PracticeService<S, C> {
    sessions: Arc<S>,
    content: Arc<C>,
    dispatcher: GradingDispatcher,
    engine: Arc<ScoringEngine>,
}

impl<S, C> PracticeService<S, C>
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    pub fn new(
        sessions: Arc<S>,
        content: Arc<C>,
        dispatcher: GradingDispatcher,
        engine: ScoringEngine,
    ) -> Self {
        Self {
            sessions,
            content,
            dispatcher,
            engine: Arc::new(engine),
        }
    }

    /// Open a session over a frozen snapshot of question groups.
    pub fn start_session(
        &self,
        user: UserId,
        question_group_ids: Vec<QuestionGroupId>,
    ) -> Result<PracticeSession, PracticeServiceError> {
        self.snapshot(&question_group_ids)?;
        let session = self.sessions.insert_session(PracticeSession {
            id: next_session_id(),
            user,
            question_groups: question_group_ids,
            started_at: Utc::now(),
            ended_at: None,
        })?;

        info!(session_id = %session.id, groups = session.question_groups.len(), "practice session started");
        Ok(session)
    }

    /// Record one answer on an open session, grading it now or queueing it for the grader.
    pub fn submit_answer(
        &self,
        session_id: &SessionId,
        user: &UserId,
        submission: AnswerSubmission,
    ) -> Result<Answer, PracticeServiceError> {
        let session = self.owned_session(session_id, user)?;
        if !session.is_open() {
            return Err(PracticeServiceError::SessionClosed(session.id));
        }
        if submission.content.trim().is_empty() {
            return Err(PracticeServiceError::BlankAnswer);
        }

        let snapshot = self.snapshot(&session.question_groups)?;
        let slot = snapshot.get(&submission.question_id).ok_or_else(|| {
            PracticeServiceError::QuestionOutsideSession {
                question: submission.question_id.clone(),
                session: session.id.clone(),
            }
        })?;

        let (answer, _) = self.record_answer(&session, slot, submission.content)?;
        Ok(answer)
    }

    /// End a session. Ending is terminal; repeating it returns the already ended session.
    pub fn finish_session(
        &self,
        session_id: &SessionId,
        user: &UserId,
    ) -> Result<PracticeSession, PracticeServiceError> {
        let mut session = self.owned_session(session_id, user)?;
        if session.is_open() {
            session.ended_at = Some(Utc::now());
            self.sessions.update_session(session.clone())?;
            info!(session_id = %session.id, "practice session finished");
        }
        Ok(session)
    }

    /// Create, answer, and end a session in one step. Blank answers are skipped.
    ///
    /// A failure while recording removes the session again, so no half-recorded session is left
    /// open behind an error.
    pub fn submit_practice(
        &self,
        user: UserId,
        submission: PracticeSubmission,
    ) -> Result<SubmissionReceipt, PracticeServiceError> {
        let PracticeSubmission {
            question_group_ids,
            answers,
        } = submission;

        let snapshot = self.snapshot(&question_group_ids)?;
        if let Some(unknown) = answers.keys().find(|id| !snapshot.contains_key(*id)) {
            return Err(PracticeServiceError::QuestionNotFound(unknown.clone()));
        }

        let session = self.start_session(user, question_group_ids)?;
        let session_id = session.id.clone();
        let receipt = match self.record_submission(session, &snapshot, answers) {
            Ok(receipt) => receipt,
            Err(err) => {
                if let Err(cleanup) = self.sessions.delete_session(&session_id) {
                    warn!(
                        session_id = %session_id,
                        error = %cleanup,
                        "unable to remove partially recorded session"
                    );
                }
                return Err(err);
            }
        };

        info!(
            session_id = %receipt.session_id,
            answers = receipt.answers_recorded,
            dispatched = receipt.grading_dispatched,
            "practice session submitted"
        );
        Ok(receipt)
    }

    /// One-shot writing submission: a session over the question's group holding one essay.
    pub fn start_and_submit_writing(
        &self,
        user: UserId,
        question_id: &QuestionId,
        content: String,
    ) -> Result<SubmissionReceipt, PracticeServiceError> {
        let question = self
            .content
            .question(question_id)?
            .ok_or_else(|| PracticeServiceError::QuestionNotFound(question_id.clone()))?;
        let group = self.group(&question.group)?;
        if group.section.is_objective() {
            return Err(PracticeServiceError::NotFreeResponse(question_id.clone()));
        }

        if content.trim().is_empty() {
            return Err(PracticeServiceError::BlankAnswer);
        }
        let mut answers = BTreeMap::new();
        answers.insert(question_id.clone(), content);

        self.submit_practice(
            user,
            PracticeSubmission {
                question_group_ids: vec![group.id],
                answers,
            },
        )
    }

    /// Queue grading again for a free-response answer that is pending or failed.
    ///
    /// Returns `false` when the answer is already graded and nothing was queued.
    pub fn request_grading(
        &self,
        answer_id: &AnswerId,
        user: &UserId,
    ) -> Result<bool, PracticeServiceError> {
        let answer = self
            .sessions
            .fetch_answer(answer_id)?
            .ok_or_else(|| PracticeServiceError::AnswerNotFound(answer_id.clone()))?;
        if &answer.user != user {
            return Err(PracticeServiceError::Forbidden);
        }

        let question = self
            .content
            .question(&answer.question)?
            .ok_or_else(|| PracticeServiceError::QuestionNotFound(answer.question.clone()))?;
        let group = self.group(&question.group)?;
        if group.section.is_objective() {
            return Err(PracticeServiceError::NotFreeResponse(question.id));
        }

        if answer.grading == GradingState::Graded {
            return Ok(false);
        }

        self.dispatcher.dispatch(GradingTask {
            answer_id: answer.id.clone(),
            prompt: question.content.clone(),
            max_score: question.max_score(),
        })?;
        info!(answer_id = %answer.id, "grading re-dispatched");
        Ok(true)
    }

    /// Band summary and per-question review for one of the requester's sessions.
    pub fn results(
        &self,
        session_id: &SessionId,
        user: &UserId,
    ) -> Result<SessionResults, PracticeServiceError> {
        let session = self.owned_session(session_id, user)?;
        let resolved = resolve_session(self.sessions.as_ref(), self.content.as_ref(), session)?;
        let summary = self.engine.summarize(&resolved)?;

        let answer_ids: Vec<AnswerId> = resolved
            .answers
            .iter()
            .map(|answer| answer.id.clone())
            .collect();
        let feedback: HashMap<AnswerId, _> = self
            .sessions
            .feedback_for_answers(&answer_ids)?
            .into_iter()
            .map(|feedback| (feedback.answer.clone(), feedback))
            .collect();
        let groups = review_session(&resolved, &feedback)?;

        Ok(SessionResults {
            session: resolved.session,
            summary,
            groups,
        })
    }

    /// Page through the requester's sessions, scoring each one independently and concurrently.
    pub async fn list_results(
        &self,
        user: &UserId,
        query: ResultsQuery,
    ) -> Result<ResultsPage, PracticeServiceError> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let window = self.sessions.sessions_for_user(
            user,
            &SessionQuery {
                offset: (page - 1).saturating_mul(limit),
                limit,
                order: query.sort_order.unwrap_or_default(),
            },
        )?;

        let mut scoring = JoinSet::new();
        for (index, session) in window.sessions.into_iter().enumerate() {
            let sessions = self.sessions.clone();
            let content = self.content.clone();
            let engine = self.engine.clone();
            scoring.spawn_blocking(move || {
                (
                    index,
                    list_entry(sessions.as_ref(), content.as_ref(), &engine, session),
                )
            });
        }

        let mut rows: Vec<Option<SessionListing>> = Vec::new();
        rows.resize_with(scoring.len(), || None);
        while let Some(joined) = scoring.join_next().await {
            let (index, row) = joined.map_err(|err| PracticeServiceError::Task(err.to_string()))?;
            rows[index] = Some(row?);
        }

        let total_pages = window.total_count.div_ceil(limit);
        Ok(ResultsPage {
            sessions: rows.into_iter().flatten().collect(),
            pagination: Pagination {
                current_page: page,
                total_pages,
                total_count: window.total_count,
                has_next_page: page < total_pages,
                has_previous_page: page > 1,
                limit,
            },
        })
    }

    /// Delete a session on behalf of its owner.
    pub fn delete_session(
        &self,
        session_id: &SessionId,
        user: &UserId,
    ) -> Result<(), PracticeServiceError> {
        let session = self.owned_session(session_id, user)?;
        self.sessions.delete_session(&session.id)?;
        info!(session_id = %session.id, "practice session deleted");
        Ok(())
    }

    fn owned_session(
        &self,
        session_id: &SessionId,
        user: &UserId,
    ) -> Result<PracticeSession, PracticeServiceError> {
        let session = self
            .sessions
            .fetch_session(session_id)?
            .ok_or_else(|| PracticeServiceError::SessionNotFound(session_id.clone()))?;
        if !session.is_owned_by(user) {
            return Err(PracticeServiceError::Forbidden);
        }
        Ok(session)
    }

    fn group(&self, id: &QuestionGroupId) -> Result<QuestionGroup, PracticeServiceError> {
        self.content
            .groups(std::slice::from_ref(id))?
            .into_iter()
            .next()
            .ok_or_else(|| PracticeServiceError::QuestionGroupNotFound(id.clone()))
    }

    /// Index every question reachable from a group snapshot, validating that each group exists.
    fn snapshot(
        &self,
        question_group_ids: &[QuestionGroupId],
    ) -> Result<HashMap<QuestionId, QuestionSlot>, PracticeServiceError> {
        if question_group_ids.is_empty() {
            return Err(PracticeServiceError::EmptySnapshot);
        }

        let groups: HashMap<QuestionGroupId, QuestionGroup> = self
            .content
            .groups(question_group_ids)?
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();
        if let Some(missing) = question_group_ids
            .iter()
            .find(|id| !groups.contains_key(*id))
        {
            return Err(PracticeServiceError::QuestionGroupNotFound(missing.clone()));
        }

        let questions = self.content.questions_for_groups(question_group_ids)?;
        let question_ids: Vec<QuestionId> = questions.iter().map(|q| q.id.clone()).collect();
        let mut keys: HashMap<QuestionId, GradingKey> = self
            .content
            .grading_keys(&question_ids)?
            .into_iter()
            .map(|key| (key.question.clone(), key))
            .collect();

        Ok(questions
            .into_iter()
            .filter_map(|question| {
                let group = groups.get(&question.group)?.clone();
                let key = keys.remove(&question.id);
                Some((
                    question.id.clone(),
                    QuestionSlot {
                        group,
                        question,
                        key,
                    },
                ))
            })
            .collect())
    }

    /// Persist an answer. Returns the stored answer and whether grading was queued for it.
    fn record_submission(
        &self,
        mut session: PracticeSession,
        snapshot: &HashMap<QuestionId, QuestionSlot>,
        answers: BTreeMap<QuestionId, String>,
    ) -> Result<SubmissionReceipt, PracticeServiceError> {
        let mut receipt = SubmissionReceipt {
            session_id: session.id.clone(),
            answers_recorded: 0,
            grading_dispatched: 0,
        };

        for (question_id, content) in answers {
            if content.trim().is_empty() {
                continue;
            }
            let Some(slot) = snapshot.get(&question_id) else {
                continue;
            };
            let (_, dispatched) = self.record_answer(&session, slot, content)?;
            receipt.answers_recorded += 1;
            if dispatched {
                receipt.grading_dispatched += 1;
            }
        }

        session.ended_at = Some(Utc::now());
        self.sessions.update_session(session)?;
        Ok(receipt)
    }

    fn record_answer(
        &self,
        session: &PracticeSession,
        slot: &QuestionSlot,
        content: String,
    ) -> Result<(Answer, bool), PracticeServiceError> {
        let mut answer = Answer {
            id: next_answer_id(),
            session: session.id.clone(),
            question: slot.question.id.clone(),
            user: session.user.clone(),
            content,
            is_correct: None,
            score: None,
            feedback: None,
            grading: GradingState::NotRequired,
            submitted_at: Utc::now(),
        };

        if slot.group.section.is_objective() {
            let reference = slot.key.as_ref().and_then(GradingKey::comparable_answer);
            let correct = compare_answers(
                Some(answer.content.as_str()),
                reference,
                &slot.group.question_type,
            );
            answer.is_correct = Some(correct);
            answer.score = Some(if correct { 1.0 } else { 0.0 });
            answer.feedback = Some(match (correct, reference) {
                (true, _) => "Correct!".to_string(),
                (false, Some(reference)) => format!("The correct answer is: {reference}"),
                (false, None) => "Grading key is missing.".to_string(),
            });
            return Ok((self.sessions.insert_answer(answer)?, false));
        }

        answer.grading = GradingState::Pending;
        let answer = self.sessions.insert_answer(answer)?;
        let task = GradingTask {
            answer_id: answer.id.clone(),
            prompt: slot.question.content.clone(),
            max_score: slot.question.max_score(),
        };

        // The answer stays pending when the queue rejects it and can be re-dispatched later.
        let dispatched = match self.dispatcher.dispatch(task) {
            Ok(()) => true,
            Err(err) => {
                warn!(answer_id = %answer.id, error = %err, "grading dispatch failed");
                false
            }
        };
        Ok((answer, dispatched))
    }
}

struct QuestionSlot {
    group: QuestionGroup,
    question: Question,
    key: Option<GradingKey>,
}

/// Join a session with its groups, questions, grading keys, and answers.
pub fn resolve_session<S, C>(
    sessions: &S,
    content: &C,
    session: PracticeSession,
) -> Result<ResolvedSession, RepositoryError>
where
    S: SessionRepository + ?Sized,
    C: ContentRepository + ?Sized,
{
    let groups = content.groups(&session.question_groups)?;
    let group_ids: Vec<QuestionGroupId> = groups.iter().map(|group| group.id.clone()).collect();

    let questions = content.questions_for_groups(&group_ids)?;
    let question_ids: Vec<QuestionId> = questions.iter().map(|q| q.id.clone()).collect();
    let mut keys: HashMap<QuestionId, GradingKey> = content
        .grading_keys(&question_ids)?
        .into_iter()
        .map(|key| (key.question.clone(), key))
        .collect();

    let mut by_group: HashMap<QuestionGroupId, Vec<ResolvedQuestion>> = HashMap::new();
    for question in questions {
        let grading_key = keys.remove(&question.id);
        by_group
            .entry(question.group.clone())
            .or_default()
            .push(ResolvedQuestion {
                question,
                grading_key,
            });
    }

    let groups = groups
        .into_iter()
        .map(|group| ResolvedGroup {
            questions: by_group.remove(&group.id).unwrap_or_default(),
            group,
        })
        .collect();
    let answers = sessions.answers_for_session(&session.id)?;

    Ok(ResolvedSession {
        session,
        groups,
        answers,
    })
}

fn list_entry<S, C>(
    sessions: &S,
    content: &C,
    engine: &ScoringEngine,
    session: PracticeSession,
) -> Result<SessionListing, PracticeServiceError>
where
    S: SessionRepository + ?Sized,
    C: ContentRepository + ?Sized,
{
    let resolved = resolve_session(sessions, content, session)?;
    let summary = engine.summarize(&resolved)?;

    let labels: HashMap<&QuestionGroupId, &ResolvedGroup> = resolved
        .groups
        .iter()
        .map(|group| (&group.group.id, group))
        .collect();
    let question_groups = resolved
        .session
        .question_groups
        .iter()
        .filter_map(|id| labels.get(id))
        .map(|group| GroupLabel {
            id: group.group.id.clone(),
            instruction: group.group.instruction.clone(),
            question_type: group.group.question_type.clone(),
        })
        .collect();

    Ok(SessionListing {
        id: resolved.session.id.clone(),
        started_at: resolved.session.started_at,
        ended_at: resolved.session.ended_at,
        summary,
        question_groups,
    })
}

/// Error raised by the practice service.
#[derive(Debug, thiserror::Error)]
pub enum PracticeServiceError {
    #[error("practice session {0} not found")]
    SessionNotFound(SessionId),
    #[error("answer {0} not found")]
    AnswerNotFound(AnswerId),
    #[error("question {0} not found")]
    QuestionNotFound(QuestionId),
    #[error("question group {0} not found")]
    QuestionGroupNotFound(QuestionGroupId),
    #[error("requested resource belongs to another user")]
    Forbidden,
    #[error("practice session {0} has already ended")]
    SessionClosed(SessionId),
    #[error("a practice session needs at least one question group")]
    EmptySnapshot,
    #[error("question {question} is not part of practice session {session}")]
    QuestionOutsideSession {
        question: QuestionId,
        session: SessionId,
    },
    #[error("answer content is blank")]
    BlankAnswer,
    #[error("question {0} is not a free-response question")]
    NotFreeResponse(QuestionId),
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("scoring task failed: {0}")]
    Task(String),
}
