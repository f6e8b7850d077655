//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented; errors become a JSON `{ "error": ... }` body.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::{IntoResponse, Response}};
use tracing::{info, instrument};

use crate::domain::AlarmId;
use crate::error::AlarmError;
use crate::logic;
use crate::protocol::*;
use crate::state::AppState;

/// `AlarmError` with an HTTP status.
pub struct ApiError(AlarmError);

impl From<AlarmError> for ApiError {
  fn from(e: AlarmError) -> Self { Self(e) }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match &self.0 {
      AlarmError::InvalidDifficulty(_) | AlarmError::InvalidTime(_) | AlarmError::InvalidDay(_) => StatusCode::BAD_REQUEST,
      AlarmError::UnknownChallenge(_) => StatusCode::NOT_FOUND,
      AlarmError::Store(_) => StatusCode::BAD_GATEWAY,
      AlarmError::ServiceUnavailable | AlarmError::WorkerStart(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ErrorOut { error: self.0.to_string() })).into_response()
  }
}

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_status(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
  Ok(Json(logic::status(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_challenges(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
  Ok(Json(logic::status(&state).await?.challenges))
}

#[instrument(level = "info", skip(state, body), fields(count = body.alarms.len()))]
pub async fn http_post_alarms(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AlarmsIn>,
) -> Result<impl IntoResponse, ApiError> {
  let count = logic::update_alarms(&state, body.alarms).await?;
  Ok(Json(AlarmsOut { count }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_reload(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
  let count = logic::reload_alarms(&state).await?;
  info!(target: "alarm", count, "HTTP reload served");
  Ok(Json(AlarmsOut { count }))
}

#[instrument(level = "info", skip(state, body), fields(%body.alarm_id, answer_len = body.answer.len()))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Json(body): Json<AnswerIn>,
) -> Result<impl IntoResponse, ApiError> {
  Ok(Json(logic::submit_answer(&state, body.alarm_id, body.answer).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_start(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
  logic::start_clock(&state).await?;
  Ok(Json(logic::status(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_stop(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
  logic::stop_clock(&state).await?;
  Ok(Json(logic::status(&state).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_challenge(
  State(state): State<Arc<AppState>>,
  Path(alarm_id): Path<AlarmId>,
) -> Result<impl IntoResponse, ApiError> {
  if !logic::cancel_challenge(&state, alarm_id).await? {
    return Err(AlarmError::UnknownChallenge(alarm_id).into());
  }
  Ok(Json(logic::status(&state).await?))
}
