//! Public protocol structs for WebSocket and HTTP endpoints (serde ready).
//! Pushed engine events live in `events::UiEvent`; this module covers requests and replies.

use serde::{Deserialize, Serialize};

use crate::challenge::{AnswerOutcome, ChallengeView};
use crate::domain::{AlarmId, AlarmRecord};
use crate::service::ServiceStatus;

/// Messages the client can send over WebSocket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientWsMessage {
    Ping,
    /// Full replacement of the alarm snapshot.
    UpdateAlarms {
        alarms: Vec<AlarmRecord>,
    },
    ReloadAlarms,
    SubmitAnswer {
        #[serde(rename = "alarmId")]
        alarm_id: AlarmId,
        /// Raw text as typed; non-numeric input counts as a wrong answer.
        answer: String,
    },
    CancelChallenge {
        #[serde(rename = "alarmId")]
        alarm_id: AlarmId,
    },
    Start,
    Stop,
    Status,
}

/// Direct replies to client messages.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerWsMessage {
    Pong,
    AlarmsUpdated {
        count: usize,
    },
    AnswerResult {
        #[serde(rename = "alarmId")]
        alarm_id: AlarmId,
        outcome: AnswerOutcome,
        challenge: Option<ChallengeView>,
    },
    Status {
        status: ServiceStatus,
    },
    Ok,
    Error {
        message: String,
    },
}

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
pub struct AlarmsIn {
    pub alarms: Vec<AlarmRecord>,
}
#[derive(Debug, Serialize)]
pub struct AlarmsOut {
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    #[serde(rename = "alarmId")]
    pub alarm_id: AlarmId,
    pub answer: String,
}
#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
