//! WebSocket upgrade + message loop.
//!
//! Two streams share one socket: client commands (each answered with exactly
//! one reply) and engine events from the service broadcast, pushed as they happen.

use std::sync::Arc;
use axum::{
  extract::{
    ws::{Message, WebSocket},
    State, WebSocketUpgrade,
  },
  response::IntoResponse,
};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, error, warn, instrument, debug};

use crate::logic;
use crate::protocol::{ClientWsMessage, ServerWsMessage};
use crate::state::AppState;

#[instrument(level = "info", skip(state))]
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
  info!(target: "mathalarm_backend", "WebSocket upgrade requested");
  ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn to_text<T: Serialize>(msg: &T) -> String {
  serde_json::to_string(msg).unwrap_or_else(|e| {
    serde_json::json!({ "type": "error", "message": format!("Serialization error: {}", e) }).to_string()
  })
}

#[instrument(level = "info", skip(socket, state))]
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
  info!(target: "mathalarm_backend", "WebSocket connected");
  let mut events = state.service.subscribe();

  if let Some(hello) = greeting(&state).await {
    if socket.send(Message::Text(to_text(&hello))).await.is_err() {
      return;
    }
  }

  loop {
    tokio::select! {
      incoming = socket.recv() => {
        let Some(Ok(msg)) = incoming else { break };
        match msg {
          Message::Text(txt) => {
            let reply = match serde_json::from_str::<ClientWsMessage>(&txt) {
              Ok(cmd) => {
                debug!(target: "mathalarm_backend", "WS received: {:?}", &cmd);
                handle_client_ws(cmd, &state).await
              }
              Err(e) => ServerWsMessage::Error { message: format!("Invalid JSON: {}", e) },
            };
            if let Err(e) = socket.send(Message::Text(to_text(&reply))).await {
              error!(target: "mathalarm_backend", error = %e, "WS send error");
              break;
            }
          }
          Message::Ping(payload) => { let _ = socket.send(Message::Pong(payload)).await; }
          Message::Close(_) => break,
          _ => {}
        }
      }
      event = events.recv() => match event {
        Ok(event) => {
          if let Err(e) = socket.send(Message::Text(to_text(&event))).await {
            error!(target: "mathalarm_backend", error = %e, "WS push error");
            break;
          }
        }
        Err(RecvError::Lagged(missed)) => {
          warn!(target: "mathalarm_backend", missed, "WS client lagging; events dropped");
        }
        Err(RecvError::Closed) => break,
      }
    }
  }
  info!(target: "mathalarm_backend", "WebSocket disconnected");
}

/// First message on a new socket. A client connecting mid-alarm needs to see
/// the open challenges.
async fn greeting(state: &AppState) -> Option<ServerWsMessage> {
  logic::status(state).await.ok().map(|status| ServerWsMessage::Status { status })
}

#[instrument(level = "info", skip(state))]
async fn handle_client_ws(msg: ClientWsMessage, state: &AppState) -> ServerWsMessage {
  let result = match msg {
    ClientWsMessage::Ping => return ServerWsMessage::Pong,

    ClientWsMessage::UpdateAlarms { alarms } =>
      logic::update_alarms(state, alarms).await.map(|count| ServerWsMessage::AlarmsUpdated { count }),

    ClientWsMessage::ReloadAlarms =>
      logic::reload_alarms(state).await.map(|count| ServerWsMessage::AlarmsUpdated { count }),

    ClientWsMessage::SubmitAnswer { alarm_id, answer } =>
      logic::submit_answer(state, alarm_id, answer).await.map(|r| ServerWsMessage::AnswerResult {
        alarm_id,
        outcome: r.outcome,
        challenge: r.challenge,
      }),

    ClientWsMessage::CancelChallenge { alarm_id } =>
      logic::cancel_challenge(state, alarm_id).await.map(|found| {
        if found { ServerWsMessage::Ok } else { ServerWsMessage::Error { message: format!("no active challenge for alarm {}", alarm_id) } }
      }),

    ClientWsMessage::Start => logic::start_clock(state).await.map(|_| ServerWsMessage::Ok),

    ClientWsMessage::Stop => logic::stop_clock(state).await.map(|_| ServerWsMessage::Ok),

    ClientWsMessage::Status => logic::status(state).await.map(|status| ServerWsMessage::Status { status }),
  };
  result.unwrap_or_else(|e| ServerWsMessage::Error { message: e.to_string() })
}

#[cfg(test)]
mod tests {
  use serde_json::{json, Value};

  use super::*;
  use crate::config::AppConfig;
  use crate::store::MemoryAlarmStore;

  fn state() -> AppState {
    AppState::with_store(&AppConfig::default(), Arc::new(MemoryAlarmStore::default()))
  }

  async fn reply(state: &AppState, text: &str) -> Value {
    let msg: ClientWsMessage = serde_json::from_str(text).unwrap();
    serde_json::from_str(&to_text(&handle_client_ws(msg, state).await)).unwrap()
  }

  #[tokio::test]
  async fn new_socket_is_greeted_with_status() {
    let state = state();
    let hello: Value = serde_json::from_str(&to_text(&greeting(&state).await.unwrap())).unwrap();
    assert_eq!(hello["type"], "status");
    assert_eq!(hello["status"]["mode"], "stopped");
    assert_eq!(hello["status"]["challenges"], json!([]));
  }

  #[tokio::test]
  async fn commands_map_to_replies() {
    let state = state();
    assert_eq!(reply(&state, r#"{"type":"ping"}"#).await, json!({ "type": "pong" }));

    let good = r#"{"type":"update_alarms","alarms":[{"id":1,"time":"07:00","days":["mon"],"difficulty":"easy"}]}"#;
    assert_eq!(reply(&state, good).await, json!({ "type": "alarms_updated", "count": 1 }));

    let bad = r#"{"type":"update_alarms","alarms":[{"id":2,"time":"25:00","days":["mon"],"difficulty":"easy"}]}"#;
    assert_eq!(reply(&state, bad).await["type"], "error");

    let unknown = reply(&state, r#"{"type":"submit_answer","alarmId":9,"answer":"4"}"#).await;
    assert_eq!(unknown["type"], "error");
    let cancel = reply(&state, r#"{"type":"cancel_challenge","alarmId":9}"#).await;
    assert_eq!(cancel["type"], "error");

    assert_eq!(reply(&state, r#"{"type":"start"}"#).await, json!({ "type": "ok" }));
    let status = reply(&state, r#"{"type":"status"}"#).await;
    assert_eq!(status["status"]["mode"], "worker");
    assert_eq!(status["status"]["alarms"], 1);
    assert_eq!(reply(&state, r#"{"type":"stop"}"#).await, json!({ "type": "ok" }));

    // the memory store is empty, so a reload replaces the pushed snapshot
    assert_eq!(reply(&state, r#"{"type":"reload_alarms"}"#).await, json!({ "type": "alarms_updated", "count": 0 }));
  }

  #[test]
  fn unknown_message_types_do_not_parse() {
    assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type":"snooze"}"#).is_err());
    assert!(serde_json::from_str::<ClientWsMessage>(r#"{"type":"submit_answer","alarmId":1}"#).is_err());
  }
}
