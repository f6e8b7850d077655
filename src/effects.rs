//! Sound, vibration and notification side effects.
//!
//! The engine only asks for them; playback happens in the UI. Every call may
//! fail, and a failure never blocks the challenge (the caller logs and moves on).

use tokio::sync::broadcast;

use crate::domain::SoundRef;
use crate::error::EffectError;
use crate::events::UiEvent;

pub trait AlarmEffects: Send + Sync {
    fn play_looping(&self, sound: &SoundRef, volume: u8) -> Result<(), EffectError>;
    fn stop_playback(&self) -> Result<(), EffectError>;
    fn vibrate(&self, pattern: &[u32]) -> Result<(), EffectError>;
    fn show_notification(&self, text: &str) -> Result<(), EffectError>;
}

/// Forwards effects to connected UI clients. With nobody connected the
/// request has nowhere to go and is reported as failed.
#[derive(Clone)]
pub struct BroadcastEffects {
    tx: broadcast::Sender<UiEvent>,
}

impl BroadcastEffects {
    pub fn new(tx: broadcast::Sender<UiEvent>) -> Self {
        Self { tx }
    }

    fn push(&self, what: &'static str, event: UiEvent) -> Result<(), EffectError> {
        self.tx.send(event).map(|_| ()).map_err(|_| EffectError::NoListener(what))
    }
}

impl AlarmEffects for BroadcastEffects {
    fn play_looping(&self, sound: &SoundRef, volume: u8) -> Result<(), EffectError> {
        self.push("playback", UiEvent::PlaySound { sound: sound.clone(), volume })
    }

    fn stop_playback(&self) -> Result<(), EffectError> {
        self.push("stop", UiEvent::StopSound)
    }

    fn vibrate(&self, pattern: &[u32]) -> Result<(), EffectError> {
        self.push("vibration", UiEvent::Vibrate { pattern: pattern.to_vec() })
    }

    fn show_notification(&self, text: &str) -> Result<(), EffectError> {
        self.push("notification", UiEvent::Notification { text: text.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_without_listeners_and_delivers_with_one() {
        let (tx, _) = broadcast::channel(8);
        let fx = BroadcastEffects::new(tx.clone());
        assert!(matches!(fx.stop_playback(), Err(EffectError::NoListener("stop"))));

        let mut rx = tx.subscribe();
        fx.vibrate(&[100, 50]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), UiEvent::Vibrate { pattern: vec![100, 50] });
    }
}
