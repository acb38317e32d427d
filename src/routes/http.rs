//! HTTP endpoint handlers. These are thin wrappers over `AppState` session ops.
//! Each handler is instrumented; answers are logged by length only.

use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::{Path, State},
  http::{header::AUTHORIZATION, HeaderMap, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::CaseId;
use crate::error::SubmitError;
use crate::protocol::*;
use crate::state::AppState;

/// HTTP-facing error: maps state-machine and lookup failures to status codes.
#[derive(Debug)]
pub enum AppError {
  Submit(SubmitError),
  UnknownCase(CaseId),
  BadRequest(String),
}

impl From<SubmitError> for AppError {
  fn from(e: SubmitError) -> Self { AppError::Submit(e) }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, error) = match self {
      AppError::Submit(e @ SubmitError::UnknownSession) => (StatusCode::NOT_FOUND, e.to_string()),
      AppError::Submit(e @ SubmitError::NotEditable { .. }) => (StatusCode::CONFLICT, e.to_string()),
      AppError::UnknownCase(id) => (StatusCode::NOT_FOUND, format!("unknown case: {}", id)),
      AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
    };
    (status, Json(ErrorOut { error })).into_response()
  }
}

/// Bearer token from the Authorization header, if present and well-formed.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
  let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
  let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer "))?.trim();
  if token.is_empty() { None } else { Some(token.to_string()) }
}

/// Submit body: empty means "submit the stored answer"; anything else must parse.
pub(crate) fn parse_submit_body(body: &[u8]) -> Result<SubmitIn, AppError> {
  if body.iter().all(u8::is_ascii_whitespace) {
    return Ok(SubmitIn::default());
  }
  serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Invalid submit body: {}", e)))
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_list_cases(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  let cases: Vec<CaseOut> = state.list_cases().await.iter().map(|c| to_out(c)).collect();
  Json(cases)
}

#[instrument(level = "info", skip(state), fields(%id))]
pub async fn http_get_case(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<CaseOut>, AppError> {
  let id = CaseId(id);
  let case = state.get_case(&id).await.ok_or(AppError::UnknownCase(id))?;
  Ok(Json(to_out(&case)))
}

#[instrument(level = "info", skip(state, body), fields(case_id = %body.case_id))]
pub async fn http_open_session(
  State(state): State<Arc<AppState>>,
  Json(body): Json<OpenSessionIn>,
) -> Result<(StatusCode, Json<SessionOut>), AppError> {
  let (session_id, view) = state
    .open_session(&body.case_id)
    .await
    .ok_or_else(|| AppError::UnknownCase(body.case_id.clone()))?;
  Ok((StatusCode::CREATED, Json(SessionOut { session_id, view })))
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn http_get_session(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<Uuid>,
) -> Result<Json<SessionOut>, AppError> {
  let view = state.view(session_id).await?;
  Ok(Json(SessionOut { session_id, view }))
}

#[instrument(level = "info", skip(state, body), fields(%session_id, answer_len = body.answer.len()))]
pub async fn http_put_answer(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<Uuid>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<SessionOut>, AppError> {
  let view = state.set_answer(session_id, body.answer).await?;
  Ok(Json(SessionOut { session_id, view }))
}

#[instrument(level = "info", skip(state, headers, body), fields(%session_id))]
pub async fn http_submit(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<Uuid>,
  headers: HeaderMap,
  body: Bytes,
) -> Result<Json<SubmitOut>, AppError> {
  let answer = parse_submit_body(&body)?.answer;
  let token = bearer_token(&headers);
  let (view, done) = state.submit(session_id, answer, token.as_deref()).await?;
  info!(target: "submission", %session_id, phase = %done.phase, solved = done.solved_now, "HTTP submit evaluated");
  Ok(Json(SubmitOut { session_id, view, solved: done.solved_now }))
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn http_try_again(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<Uuid>,
) -> Result<Json<SessionOut>, AppError> {
  let view = state.try_again(session_id).await?;
  Ok(Json(SessionOut { session_id, view }))
}

#[instrument(level = "info", skip(state), fields(%session_id))]
pub async fn http_close_session(
  State(state): State<Arc<AppState>>,
  Path(session_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
  state.close_session(session_id).await?;
  Ok(StatusCode::NO_CONTENT)
}
