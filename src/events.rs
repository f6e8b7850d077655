//! Events pushed to UI clients (broadcast over every open WebSocket).

use serde::Serialize;

use crate::challenge::ChallengeView;
use crate::domain::{Alarm, AlarmId, SoundRef};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    AlarmFired {
        alarm: Alarm,
    },
    /// New problem or solved-count change.
    ChallengeUpdated {
        challenge: ChallengeView,
    },
    WrongAnswer {
        #[serde(rename = "alarmId")]
        alarm_id: AlarmId,
    },
    ChallengeComplete {
        #[serde(rename = "alarmId")]
        alarm_id: AlarmId,
    },
    ChallengeCancelled {
        #[serde(rename = "alarmId")]
        alarm_id: AlarmId,
    },
    // side effects, executed by the UI
    PlaySound {
        sound: SoundRef,
        volume: u8,
    },
    StopSound,
    Vibrate {
        pattern: Vec<u32>,
    },
    Notification {
        text: String,
    },
}
