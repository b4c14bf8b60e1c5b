use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::practice::domain::{
    Answer, AnswerId, Criterion, CriterionFeedback, DetailedFeedback, GradingKey, GradingState,
    PracticeSession, Question, QuestionGroup, QuestionGroupId, QuestionId, QuestionType,
    ResolvedGroup, ResolvedQuestion, ResolvedSession, ScoringType, Section, SessionId, UserId,
};
use crate::practice::grading::{
    EssayGrade, EssayGrader, GraderError, GradingDispatcher, GradingRequest, GradingTask,
    RetryPolicy,
};
use crate::practice::repository::{
    ContentRepository, GradeRecord, RepositoryError, SessionPage, SessionQuery,
    SessionRepository, SortOrder,
};
use crate::practice::scoring::ScoringEngine;
use crate::practice::service::PracticeService;

pub(super) const READING_GROUP: &str = "qg-reading";
pub(super) const WRITING_GROUP: &str = "qg-writing";
pub(super) const ESSAY_QUESTION: &str = "q-essay";

pub(super) fn learner() -> UserId {
    UserId("user-ana".to_string())
}

pub(super) fn other_learner() -> UserId {
    UserId("user-ben".to_string())
}

pub(super) fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 14, 9, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn group_id(id: &str) -> QuestionGroupId {
    QuestionGroupId(id.to_string())
}

pub(super) fn question_id(id: &str) -> QuestionId {
    QuestionId(id.to_string())
}

pub(super) fn reading_group(id: &str, question_type: QuestionType) -> QuestionGroup {
    QuestionGroup {
        id: group_id(id),
        instruction: "Do the statements agree with the passage?".to_string(),
        section: Section::Reading,
        question_type,
        order: 1,
    }
}

pub(super) fn writing_group(id: &str) -> QuestionGroup {
    QuestionGroup {
        id: group_id(id),
        instruction: "Write at least 250 words.".to_string(),
        section: Section::Writing,
        question_type: QuestionType::Essay,
        order: 2,
    }
}

/// Reading group with one question per reference answer, ids `{group}-q{n}`.
pub(super) fn resolved_reading(
    id: &str,
    question_type: QuestionType,
    references: &[&str],
) -> ResolvedGroup {
    let group = reading_group(id, question_type);
    let questions = references
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let qid = question_id(&format!("{id}-q{}", index + 1));
            ResolvedQuestion {
                question: Question {
                    id: qid.clone(),
                    group: group.id.clone(),
                    content: format!("Statement {}", index + 1),
                    max_score: None,
                },
                grading_key: Some(GradingKey {
                    question: qid,
                    correct_answer: (*reference).to_string(),
                    scoring_type: ScoringType::Exact,
                }),
            }
        })
        .collect();
    ResolvedGroup { group, questions }
}

pub(super) fn resolved_writing(id: &str, question: &str, max_score: Option<f32>) -> ResolvedGroup {
    let group = writing_group(id);
    ResolvedGroup {
        questions: vec![ResolvedQuestion {
            question: Question {
                id: question_id(question),
                group: group.id.clone(),
                content: "Some people think cities should ban cars. Discuss.".to_string(),
                max_score,
            },
            grading_key: None,
        }],
        group,
    }
}

pub(super) fn session_over(id: &str, groups: &[&ResolvedGroup]) -> PracticeSession {
    PracticeSession {
        id: SessionId(id.to_string()),
        user: learner(),
        question_groups: groups.iter().map(|group| group.group.id.clone()).collect(),
        started_at: at(0),
        ended_at: Some(at(30)),
    }
}

pub(super) fn answer(session: &str, question: &str, content: &str, minute: u32) -> Answer {
    Answer {
        id: AnswerId(format!("{session}-{question}-{minute}")),
        session: SessionId(session.to_string()),
        question: question_id(question),
        user: learner(),
        content: content.to_string(),
        is_correct: None,
        score: None,
        feedback: None,
        grading: GradingState::NotRequired,
        submitted_at: at(minute),
    }
}

pub(super) fn essay_answer(session: &str, question: &str, grading: GradingState) -> Answer {
    let mut answer = answer(session, question, "Cars bring both freedom and pollution.", 20);
    answer.grading = grading;
    answer
}

pub(super) fn graded_essay(session: &str, question: &str, score: f32) -> Answer {
    let mut answer = essay_answer(session, question, GradingState::Graded);
    answer.score = Some(score);
    answer.feedback = Some("Clear position throughout.".to_string());
    answer
}

pub(super) fn resolved(
    id: &str,
    groups: Vec<ResolvedGroup>,
    answers: Vec<Answer>,
) -> ResolvedSession {
    let refs: Vec<&ResolvedGroup> = groups.iter().collect();
    let session = session_over(id, &refs);
    ResolvedSession {
        session,
        groups,
        answers,
    }
}

pub(super) fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

pub(super) fn criteria(score: f32) -> BTreeMap<Criterion, CriterionFeedback> {
    [
        Criterion::TaskAchievement,
        Criterion::CoherenceAndCohesion,
        Criterion::LexicalResource,
        Criterion::GrammaticalRangeAndAccuracy,
    ]
    .into_iter()
    .map(|criterion| {
        (
            criterion,
            CriterionFeedback {
                score,
                feedback: "Adequate.".to_string(),
            },
        )
    })
    .collect()
}

#[derive(Default)]
struct StoreState {
    groups: Vec<QuestionGroup>,
    questions: Vec<Question>,
    keys: HashMap<QuestionId, GradingKey>,
    sessions: HashMap<SessionId, PracticeSession>,
    answers: Vec<Answer>,
    feedback: HashMap<AnswerId, DetailedFeedback>,
    answer_budget: Option<usize>,
}

/// In-memory content library and session store.
#[derive(Default)]
pub(super) struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Store seeded with a four question true/false/not given group and a one essay group.
    pub(super) fn seeded() -> Self {
        let store = Self::default();
        store.add_group(
            resolved_reading(
                READING_GROUP,
                QuestionType::TrueFalseNotGiven,
                &["TRUE", "FALSE", "TRUE", "NOT GIVEN"],
            ),
        );
        store.add_group(resolved_writing(WRITING_GROUP, ESSAY_QUESTION, Some(9.0)));
        store
    }

    pub(super) fn add_group(&self, group: ResolvedGroup) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        for question in group.questions {
            if let Some(key) = question.grading_key {
                state.keys.insert(key.question.clone(), key);
            }
            state.questions.push(question.question);
        }
        state.groups.push(group.group);
    }

    pub(super) fn put_session(&self, session: PracticeSession) {
        let mut state = self.state.lock().expect("store mutex poisoned");
        state.sessions.insert(session.id.clone(), session);
    }

    /// Accept `count` more answers, then report the store as unavailable.
    pub(super) fn fail_answers_after(&self, count: usize) {
        self.state.lock().expect("store mutex poisoned").answer_budget = Some(count);
    }

    pub(super) fn answer(&self, id: &AnswerId) -> Answer {
        self.fetch_answer(id)
            .expect("fetch succeeds")
            .expect("answer present")
    }

    pub(super) fn feedback_count(&self) -> usize {
        self.state
            .lock()
            .expect("store mutex poisoned")
            .feedback
            .len()
    }
}

impl ContentRepository for MemoryStore {
    fn groups(&self, ids: &[QuestionGroupId]) -> Result<Vec<QuestionGroup>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| state.groups.iter().find(|group| &group.id == id).cloned())
            .collect())
    }

    fn questions_for_groups(
        &self,
        ids: &[QuestionGroupId],
    ) -> Result<Vec<Question>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .questions
            .iter()
            .filter(|question| ids.contains(&question.group))
            .cloned()
            .collect())
    }

    fn question(&self, id: &QuestionId) -> Result<Option<Question>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.questions.iter().find(|q| &q.id == id).cloned())
    }

    fn grading_keys(&self, ids: &[QuestionId]) -> Result<Vec<GradingKey>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| state.keys.get(id).cloned())
            .collect())
    }
}

impl SessionRepository for MemoryStore {
    fn insert_session(&self, session: PracticeSession) -> Result<PracticeSession, RepositoryError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if state.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn update_session(&self, session: PracticeSession) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        match state.sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_session(&self, id: &SessionId) -> Result<Option<PracticeSession>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.sessions.get(id).cloned())
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        if state.sessions.remove(id).is_none() {
            return Err(RepositoryError::NotFound);
        }
        let removed: Vec<AnswerId> = state
            .answers
            .iter()
            .filter(|answer| &answer.session == id)
            .map(|answer| answer.id.clone())
            .collect();
        state.answers.retain(|answer| &answer.session != id);
        for answer in removed {
            state.feedback.remove(&answer);
        }
        Ok(())
    }

    fn sessions_for_user(
        &self,
        user: &UserId,
        query: &SessionQuery,
    ) -> Result<SessionPage, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        let mut sessions: Vec<PracticeSession> = state
            .sessions
            .values()
            .filter(|session| &session.user == user)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| (a.started_at, &a.id).cmp(&(b.started_at, &b.id)));
        if query.order == SortOrder::Descending {
            sessions.reverse();
        }

        let total_count = sessions.len();
        let sessions = sessions
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();
        Ok(SessionPage {
            sessions,
            total_count,
        })
    }

    fn insert_answer(&self, answer: Answer) -> Result<Answer, RepositoryError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        match state.answer_budget {
            Some(0) => return Err(RepositoryError::Unavailable("answer store offline".to_string())),
            Some(left) => state.answer_budget = Some(left - 1),
            None => {}
        }
        if state.answers.iter().any(|existing| existing.id == answer.id) {
            return Err(RepositoryError::Conflict);
        }
        state.answers.push(answer.clone());
        Ok(answer)
    }

    fn fetch_answer(&self, id: &AnswerId) -> Result<Option<Answer>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state.answers.iter().find(|answer| &answer.id == id).cloned())
    }

    fn answers_for_session(&self, id: &SessionId) -> Result<Vec<Answer>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(state
            .answers
            .iter()
            .filter(|answer| &answer.session == id)
            .cloned()
            .collect())
    }

    fn record_grade(&self, id: &AnswerId, grade: GradeRecord) -> Result<bool, RepositoryError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let answer = state
            .answers
            .iter_mut()
            .find(|answer| &answer.id == id)
            .ok_or(RepositoryError::NotFound)?;
        if answer.grading == GradingState::Graded {
            return Ok(false);
        }
        answer.score = Some(grade.score);
        answer.feedback = Some(grade.feedback);
        answer.grading = GradingState::Graded;
        state.feedback.insert(id.clone(), grade.detailed);
        Ok(true)
    }

    fn mark_grading_failed(&self, id: &AnswerId, reason: String) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().expect("store mutex poisoned");
        let answer = state
            .answers
            .iter_mut()
            .find(|answer| &answer.id == id)
            .ok_or(RepositoryError::NotFound)?;
        if answer.grading != GradingState::Graded {
            answer.grading = GradingState::Failed { reason };
        }
        Ok(())
    }

    fn feedback_for_answers(
        &self,
        ids: &[AnswerId],
    ) -> Result<Vec<DetailedFeedback>, RepositoryError> {
        let state = self.state.lock().expect("store mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| state.feedback.get(id).cloned())
            .collect())
    }
}

/// Grader that always returns the same band.
pub(super) struct FixedGrader {
    pub(super) score: f32,
    pub(super) calls: AtomicU32,
}

impl FixedGrader {
    pub(super) fn new(score: f32) -> Self {
        Self {
            score,
            calls: AtomicU32::new(0),
        }
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EssayGrader for FixedGrader {
    async fn grade(&self, _request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EssayGrade {
            overall_score: self.score,
            summary_feedback: "Well organised response.".to_string(),
            criteria: criteria(self.score),
        })
    }
}

/// Grader that fails with a transport error a fixed number of times before succeeding.
pub(super) struct FlakyGrader {
    failures_left: AtomicU32,
    calls: AtomicU32,
    score: f32,
}

impl FlakyGrader {
    pub(super) fn new(failures: u32, score: f32) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            score,
        }
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EssayGrader for FlakyGrader {
    async fn grade(&self, _request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(GraderError::Transport("connection reset".to_string()));
        }
        Ok(EssayGrade {
            overall_score: self.score,
            summary_feedback: "Recovered response.".to_string(),
            criteria: criteria(self.score),
        })
    }
}

/// Grader that is never reachable.
pub(super) struct OfflineGrader;

impl EssayGrader for OfflineGrader {
    async fn grade(&self, _request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        Err(GraderError::Unavailable("grader offline".to_string()))
    }
}

/// Grader that takes a while to answer and returns the next score from a list on each call.
pub(super) struct SlowGrader {
    delay: Duration,
    scores: Vec<f32>,
    calls: AtomicU32,
}

impl SlowGrader {
    pub(super) fn new(delay: Duration, scores: Vec<f32>) -> Self {
        Self {
            delay,
            scores,
            calls: AtomicU32::new(0),
        }
    }

    pub(super) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl EssayGrader for SlowGrader {
    async fn grade(&self, _request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let score = self.scores[call.min(self.scores.len() - 1)];
        tokio::time::sleep(self.delay).await;
        Ok(EssayGrade {
            overall_score: score,
            summary_feedback: format!("Scored {score}."),
            criteria: criteria(score),
        })
    }
}

pub(super) type MemoryService = PracticeService<MemoryStore, MemoryStore>;

/// Service over a seeded store. The receiver is returned so tests can observe dispatched tasks.
pub(super) fn build_service() -> (MemoryService, Arc<MemoryStore>, mpsc::Receiver<GradingTask>) {
    let store = Arc::new(MemoryStore::seeded());
    let (dispatcher, receiver) = GradingDispatcher::channel(16);
    let service = PracticeService::new(
        store.clone(),
        store.clone(),
        dispatcher,
        ScoringEngine::default(),
    );
    (service, store, receiver)
}

pub(super) fn tfng_answers() -> BTreeMap<QuestionId, String> {
    [
        ("qg-reading-q1", "true"),
        ("qg-reading-q2", "false"),
        ("qg-reading-q3", "false"),
        ("qg-reading-q4", "not given"),
    ]
    .into_iter()
    .map(|(question, content)| (question_id(question), content.to_string()))
    .collect()
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("valid json")
}
