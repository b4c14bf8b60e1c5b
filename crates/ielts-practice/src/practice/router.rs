use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{AnswerId, QuestionGroupId, QuestionId, SessionId, UserId};
use super::repository::{ContentRepository, RepositoryError, SessionRepository};
use super::scoring::ScoringError;
use super::service::{
    AnswerSubmission, PracticeService, PracticeServiceError, PracticeSubmission, ResultsQuery,
};

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone, Deserialize)]
pub struct StartSessionRequest {
    pub question_group_ids: Vec<QuestionGroupId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WritingSubmissionRequest {
    pub question_id: QuestionId,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradeRequest {
    pub answer_id: AnswerId,
}

/// Router builder exposing session, submission, grading, and results endpoints.
pub fn practice_router<S, C>(service: Arc<PracticeService<S, C>>) -> Router
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    Router::new()
        .route("/api/v1/practice/sessions", post(start_handler::<S, C>))
        .route(
            "/api/v1/practice/sessions/:session_id",
            delete(delete_handler::<S, C>),
        )
        .route(
            "/api/v1/practice/sessions/:session_id/answers",
            post(answer_handler::<S, C>),
        )
        .route(
            "/api/v1/practice/sessions/:session_id/finish",
            post(finish_handler::<S, C>),
        )
        .route("/api/v1/practice/submit", post(submit_handler::<S, C>))
        .route(
            "/api/v1/practice/writing/start-and-submit",
            post(writing_handler::<S, C>),
        )
        .route(
            "/api/v1/practice/writing/grade",
            post(grade_handler::<S, C>),
        )
        .route("/api/v1/practice/results", get(list_handler::<S, C>))
        .route(
            "/api/v1/practice/results/:session_id",
            get(results_handler::<S, C>),
        )
        .with_state(service)
}

pub(crate) async fn start_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<StartSessionRequest>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.start_session(user, request.question_group_ids) {
        Ok(session) => (StatusCode::CREATED, axum::Json(session)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn answer_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
    axum::Json(submission): axum::Json<AnswerSubmission>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.submit_answer(&SessionId(session_id), &user, submission) {
        Ok(answer) => (StatusCode::CREATED, axum::Json(answer)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn finish_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.finish_session(&SessionId(session_id), &user) {
        Ok(session) => (StatusCode::OK, axum::Json(session)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn delete_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.delete_session(&SessionId(session_id), &user) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn submit_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    axum::Json(submission): axum::Json<PracticeSubmission>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.submit_practice(user, submission) {
        Ok(receipt) => (StatusCode::CREATED, axum::Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn writing_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<WritingSubmissionRequest>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.start_and_submit_writing(user, &request.question_id, request.content) {
        Ok(receipt) => (StatusCode::ACCEPTED, axum::Json(receipt)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn grade_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    axum::Json(request): axum::Json<GradeRequest>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.request_grading(&request.answer_id, &user) {
        Ok(queued) => {
            let payload = json!({
                "answer_id": request.answer_id,
                "queued": queued,
            });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub(crate) async fn list_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    Query(query): Query<ResultsQuery>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.list_results(&user, query).await {
        Ok(page) => (StatusCode::OK, axum::Json(page)).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn results_handler<S, C>(
    State(service): State<Arc<PracticeService<S, C>>>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> Response
where
    S: SessionRepository + 'static,
    C: ContentRepository + 'static,
{
    let user = match requester(&headers) {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.results(&SessionId(session_id), &user) {
        Ok(results) => (StatusCode::OK, axum::Json(results)).into_response(),
        Err(err) => error_response(err),
    }
}

fn requester(headers: &HeaderMap) -> Result<UserId, Response> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| UserId(value.to_string()))
        .ok_or_else(|| {
            let payload = json!({
                "error": format!("missing {USER_HEADER} header"),
            });
            (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
        })
}

pub(crate) fn error_response(err: PracticeServiceError) -> Response {
    let status = match &err {
        PracticeServiceError::SessionNotFound(_)
        | PracticeServiceError::AnswerNotFound(_)
        | PracticeServiceError::QuestionNotFound(_)
        | PracticeServiceError::QuestionGroupNotFound(_)
        | PracticeServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        PracticeServiceError::Forbidden => StatusCode::FORBIDDEN,
        PracticeServiceError::SessionClosed(_)
        | PracticeServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        PracticeServiceError::EmptySnapshot
        | PracticeServiceError::QuestionOutsideSession { .. }
        | PracticeServiceError::BlankAnswer
        | PracticeServiceError::NotFreeResponse(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PracticeServiceError::Dispatch(_)
        | PracticeServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        PracticeServiceError::Scoring(ScoringError::MissingAssociation(_))
        | PracticeServiceError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(error = %err, "practice request failed");
    }

    // Internal association failures stay in the logs; callers get a generic message.
    let message = match &err {
        PracticeServiceError::Scoring(_) | PracticeServiceError::Task(_) => {
            "could not compute results".to_string()
        }
        other => other.to_string(),
    };
    (status, axum::Json(json!({ "error": message }))).into_response()
}
