//! Core behaviors shared by both HTTP and WebSocket handlers.
//!
//! This includes:
//!   - validating incoming alarm records and replacing the snapshot
//!   - forwarding answers to the service and logging the outcome
//!   - clock start/stop and status

use tracing::{info, warn, instrument};

use crate::domain::{Alarm, AlarmId, AlarmRecord};
use crate::error::AlarmError;
use crate::service::{AnswerReply, ClockMode, ServiceStatus};
use crate::state::AppState;
use crate::util::trunc_for_log;

/// Validate every record first; one bad tag rejects the whole update and the
/// current snapshot stays in place.
#[instrument(level = "info", skip(state, records), fields(count = records.len()))]
pub async fn update_alarms(state: &AppState, records: Vec<AlarmRecord>) -> Result<usize, AlarmError> {
  let alarms = records
    .into_iter()
    .map(|rec| Alarm::from_record(rec, &state.sounds))
    .collect::<Result<Vec<_>, _>>()
    .map_err(|e| {
      warn!(target: "alarm", error = %e, "Rejected alarm update");
      e
    })?;
  let count = alarms.len();
  state.service.update_alarms(alarms).await?;
  info!(target: "alarm", count, "Alarm snapshot submitted");
  Ok(count)
}

#[instrument(level = "info", skip(state))]
pub async fn reload_alarms(state: &AppState) -> Result<usize, AlarmError> {
  state.service.reload_alarms().await
}

#[instrument(level = "info", skip(state, answer), fields(%alarm_id, answer_len = answer.len()))]
pub async fn submit_answer(state: &AppState, alarm_id: AlarmId, answer: String) -> Result<AnswerReply, AlarmError> {
  let shown = trunc_for_log(&answer, 32);
  let reply = state.service.submit_answer(alarm_id, answer).await?;
  info!(target: "challenge", %alarm_id, answer = %shown, outcome = ?reply.outcome, "Answer graded");
  Ok(reply)
}

#[instrument(level = "info", skip(state))]
pub async fn cancel_challenge(state: &AppState, alarm_id: AlarmId) -> Result<bool, AlarmError> {
  state.service.cancel_challenge(alarm_id).await
}

#[instrument(level = "info", skip(state))]
pub async fn start_clock(state: &AppState) -> Result<ClockMode, AlarmError> {
  let mode = state.service.start().await?;
  info!(target: "alarm", ?mode, "Scheduler started");
  Ok(mode)
}

#[instrument(level = "info", skip(state))]
pub async fn stop_clock(state: &AppState) -> Result<(), AlarmError> {
  state.service.stop().await?;
  info!(target: "alarm", "Scheduler stopped");
  Ok(())
}

pub async fn status(state: &AppState) -> Result<ServiceStatus, AlarmError> {
  state.service.status().await
}
