use ielts_practice::config::GradingConfig;
use ielts_practice::practice::{
    Answer, AnswerId, ContentRepository, DetailedFeedback, EssayGrade, EssayGrader, GradeRecord,
    GraderError, GradingKey, GradingRequest, GradingState, PracticeSession, Question,
    QuestionGroup, QuestionGroupId, QuestionId, QuestionType, RepositoryError, ScoringType,
    Section, SessionId, SessionPage, SessionQuery, SessionRepository, SortOrder, UserId,
};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const GRADER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryContentRepository {
    groups: Arc<Mutex<Vec<QuestionGroup>>>,
    questions: Arc<Mutex<Vec<Question>>>,
    keys: Arc<Mutex<HashMap<QuestionId, GradingKey>>>,
}

impl InMemoryContentRepository {
    /// Library holding one true/false/not given passage and one Task 2 essay prompt.
    pub(crate) fn with_sample_content() -> Self {
        let repository = Self::default();
        repository.add_group(
            QuestionGroup {
                id: QuestionGroupId("reading-passage-1".to_string()),
                instruction: "Do the following statements agree with the information given in \
                              the passage? Write TRUE, FALSE or NOT GIVEN."
                    .to_string(),
                section: Section::Reading,
                question_type: QuestionType::TrueFalseNotGiven,
                order: 1,
            },
            [
                ("The canal was completed ahead of schedule.", "FALSE"),
                ("Local merchants funded part of the construction.", "TRUE"),
                ("The engineer later designed a second canal.", "NOT GIVEN"),
                ("Traffic on the canal declined after the railway opened.", "TRUE"),
            ]
            .into_iter()
            .enumerate()
            .map(|(index, (content, reference))| {
                (
                    format!("reading-passage-1-q{}", index + 1),
                    content,
                    Some(reference),
                )
            })
            .collect(),
        );
        repository.add_group(
            QuestionGroup {
                id: QuestionGroupId("writing-task-2".to_string()),
                instruction: "Write at least 250 words.".to_string(),
                section: Section::Writing,
                question_type: QuestionType::Essay,
                order: 2,
            },
            vec![(
                "writing-task-2-q1".to_string(),
                "Some people believe museums should be free for everyone. To what extent do you \
                 agree or disagree?",
                None,
            )],
        );
        repository
    }

    fn add_group(&self, group: QuestionGroup, questions: Vec<(String, &str, Option<&str>)>) {
        let mut stored = self.questions.lock().expect("content mutex poisoned");
        let mut keys = self.keys.lock().expect("content mutex poisoned");
        for (id, content, reference) in questions {
            let id = QuestionId(id);
            if let Some(reference) = reference {
                keys.insert(
                    id.clone(),
                    GradingKey {
                        question: id.clone(),
                        correct_answer: reference.to_string(),
                        scoring_type: ScoringType::Exact,
                    },
                );
            }
            stored.push(Question {
                id,
                group: group.id.clone(),
                content: content.to_string(),
                max_score: None,
            });
        }
        self.groups
            .lock()
            .expect("content mutex poisoned")
            .push(group);
    }
}

impl ContentRepository for InMemoryContentRepository {
    fn groups(&self, ids: &[QuestionGroupId]) -> Result<Vec<QuestionGroup>, RepositoryError> {
        let guard = self.groups.lock().expect("content mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| guard.iter().find(|group| &group.id == id).cloned())
            .collect())
    }

    fn questions_for_groups(
        &self,
        ids: &[QuestionGroupId],
    ) -> Result<Vec<Question>, RepositoryError> {
        let guard = self.questions.lock().expect("content mutex poisoned");
        Ok(guard
            .iter()
            .filter(|question| ids.contains(&question.group))
            .cloned()
            .collect())
    }

    fn question(&self, id: &QuestionId) -> Result<Option<Question>, RepositoryError> {
        let guard = self.questions.lock().expect("content mutex poisoned");
        Ok(guard.iter().find(|question| &question.id == id).cloned())
    }

    fn grading_keys(&self, ids: &[QuestionId]) -> Result<Vec<GradingKey>, RepositoryError> {
        let guard = self.keys.lock().expect("content mutex poisoned");
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }
}

#[derive(Default)]
struct SessionTables {
    sessions: HashMap<SessionId, PracticeSession>,
    answers: HashMap<AnswerId, Answer>,
    feedback: HashMap<AnswerId, DetailedFeedback>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemorySessionRepository {
    tables: Arc<Mutex<SessionTables>>,
}

impl SessionRepository for InMemorySessionRepository {
    fn insert_session(&self, session: PracticeSession) -> Result<PracticeSession, RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        if guard.sessions.contains_key(&session.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn update_session(&self, session: PracticeSession) -> Result<(), RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        if guard.sessions.contains_key(&session.id) {
            guard.sessions.insert(session.id.clone(), session);
            Ok(())
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    fn fetch_session(&self, id: &SessionId) -> Result<Option<PracticeSession>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        Ok(guard.sessions.get(id).cloned())
    }

    fn delete_session(&self, id: &SessionId) -> Result<(), RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        guard
            .sessions
            .remove(id)
            .ok_or(RepositoryError::NotFound)?;
        let SessionTables {
            answers, feedback, ..
        } = &mut *guard;
        answers.retain(|answer_id, answer| {
            let keep = &answer.session != id;
            if !keep {
                feedback.remove(answer_id);
            }
            keep
        });
        Ok(())
    }

    fn sessions_for_user(
        &self,
        user: &UserId,
        query: &SessionQuery,
    ) -> Result<SessionPage, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        let mut sessions: Vec<PracticeSession> = guard
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
        Ok(SessionPage {
            sessions: sessions
                .into_iter()
                .skip(query.offset)
                .take(query.limit)
                .collect(),
            total_count,
        })
    }

    fn insert_answer(&self, answer: Answer) -> Result<Answer, RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        if !guard.sessions.contains_key(&answer.session) {
            return Err(RepositoryError::NotFound);
        }
        if guard.answers.contains_key(&answer.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.answers.insert(answer.id.clone(), answer.clone());
        Ok(answer)
    }

    fn fetch_answer(&self, id: &AnswerId) -> Result<Option<Answer>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        Ok(guard.answers.get(id).cloned())
    }

    fn answers_for_session(&self, id: &SessionId) -> Result<Vec<Answer>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        let mut answers: Vec<Answer> = guard
            .answers
            .values()
            .filter(|answer| &answer.session == id)
            .cloned()
            .collect();
        answers.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(answers)
    }

    fn record_grade(&self, id: &AnswerId, grade: GradeRecord) -> Result<bool, RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        let answer = guard.answers.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if answer.grading == GradingState::Graded {
            return Ok(false);
        }
        answer.score = Some(grade.score);
        answer.feedback = Some(grade.feedback);
        answer.grading = GradingState::Graded;
        guard.feedback.insert(id.clone(), grade.detailed);
        Ok(true)
    }

    fn mark_grading_failed(&self, id: &AnswerId, reason: String) -> Result<(), RepositoryError> {
        let mut guard = self.tables.lock().expect("repository mutex poisoned");
        let answer = guard.answers.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if answer.grading != GradingState::Graded {
            answer.grading = GradingState::Failed { reason };
        }
        Ok(())
    }

    fn feedback_for_answers(
        &self,
        ids: &[AnswerId],
    ) -> Result<Vec<DetailedFeedback>, RepositoryError> {
        let guard = self.tables.lock().expect("repository mutex poisoned");
        Ok(ids
            .iter()
            .filter_map(|id| guard.feedback.get(id).cloned())
            .collect())
    }
}

#[derive(Serialize)]
struct GradePayload<'a> {
    model: &'a str,
    answer_id: &'a AnswerId,
    prompt: &'a str,
    essay: &'a str,
    max_score: f32,
}

/// Essay grader reached over HTTP. The endpoint answers with an [`EssayGrade`] document.
pub(crate) struct HttpEssayGrader {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEssayGrader {
    pub(crate) fn new(endpoint: String, config: &GradingConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(GRADER_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

impl EssayGrader for HttpEssayGrader {
    async fn grade(&self, request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        let payload = GradePayload {
            model: &self.model,
            answer_id: &request.answer_id,
            prompt: &request.prompt,
            essay: &request.essay,
            max_score: request.max_score,
        };

        let mut call = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let response = call
            .send()
            .await
            .map_err(|err| GraderError::Transport(err.to_string()))?;
        let status = response.status();
        debug!(answer_id = %request.answer_id, %status, "grader responded");

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GraderError::Transport(format!("grader returned {status}")));
        }
        if !status.is_success() {
            return Err(GraderError::Unavailable(format!("grader returned {status}")));
        }

        response
            .json::<EssayGrade>()
            .await
            .map_err(|err| GraderError::InvalidResponse(err.to_string()))
    }
}

/// Grader selected at startup from configuration.
pub(crate) enum ConfiguredGrader {
    Http(HttpEssayGrader),
    /// No grader URL configured: every essay ends up in the failed state.
    Unconfigured,
}

impl EssayGrader for ConfiguredGrader {
    async fn grade(&self, request: &GradingRequest) -> Result<EssayGrade, GraderError> {
        match self {
            ConfiguredGrader::Http(grader) => grader.grade(request).await,
            ConfiguredGrader::Unconfigured => Err(GraderError::Unavailable(
                "GRADER_URL is not configured".to_string(),
            )),
        }
    }
}

pub(crate) fn grader_from_config(config: &GradingConfig) -> Result<ConfiguredGrader, reqwest::Error> {
    match &config.grader_url {
        Some(url) => Ok(ConfiguredGrader::Http(HttpEssayGrader::new(
            url.clone(),
            config,
        )?)),
        None => Ok(ConfiguredGrader::Unconfigured),
    }
}
