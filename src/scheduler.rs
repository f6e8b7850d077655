//! Scheduling loop state: alarm snapshot, fired-this-minute table and the open challenges.
//!
//! Synchronous and single-owner. The `service` actor drives it, either from
//! its own interval (`tick`) or from clock worker messages (`handle_fired`).
//! Every operation returns the UI events it produced; side effects go through
//! `AlarmEffects` and their failures are logged, never propagated.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::challenge::{AnswerOutcome, Challenge, ChallengeView};
use crate::clock::ClockState;
use crate::domain::{Alarm, AlarmId};
use crate::effects::AlarmEffects;
use crate::error::{AlarmError, EffectError};
use crate::events::UiEvent;
use crate::util::fill_template;

#[derive(Clone, Debug)]
pub struct SchedulerSettings {
    pub required_solves: u32,
    pub vibration_pattern: Vec<u32>,
    pub notification_template: String,
}

/// What to ask of the store once an alarm has been dismissed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostFireAction {
    Disable(AlarmId),
    Delete(AlarmId),
}

#[derive(Debug)]
pub struct AnswerReport {
    pub outcome: AnswerOutcome,
    pub events: Vec<UiEvent>,
    /// Set when the challenge completed and its alarm is still known.
    pub follow_up: Option<PostFireAction>,
}

struct OpenChallenge {
    challenge: Challenge,
    /// `autoDelete` as it was when the alarm fired.
    auto_delete: bool,
}

pub struct Scheduler {
    clock: ClockState,
    challenges: HashMap<AlarmId, OpenChallenge>,
    effects: Arc<dyn AlarmEffects>,
    settings: SchedulerSettings,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(effects: Arc<dyn AlarmEffects>, settings: SchedulerSettings) -> Self {
        Self::with_rng(effects, settings, StdRng::from_entropy())
    }

    pub fn with_rng(effects: Arc<dyn AlarmEffects>, settings: SchedulerSettings, rng: StdRng) -> Self {
        Self {
            clock: ClockState::default(),
            challenges: HashMap::new(),
            effects,
            settings,
            rng,
        }
    }

    /// Replace the alarm snapshot. Open challenges are left alone, even for
    /// alarms that are no longer in the list.
    pub fn update_alarms(&mut self, alarms: Vec<Alarm>) {
        debug!(target: "alarm", count = alarms.len(), "Alarm snapshot replaced");
        self.clock.set_alarms(alarms);
    }

    pub fn alarms(&self) -> &[Alarm] {
        self.clock.alarms()
    }

    pub fn challenges(&self) -> Vec<ChallengeView> {
        let mut views: Vec<_> = self.challenges.values().map(|o| o.challenge.view()).collect();
        views.sort_by_key(|v| v.alarm_id);
        views
    }

    #[cfg(test)]
    pub fn has_challenge(&self, alarm_id: AlarmId) -> bool {
        self.challenges.contains_key(&alarm_id)
    }

    /// Evaluate the clock in this context and fire whatever is due.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<UiEvent> {
        let mut events = Vec::new();
        for alarm in self.clock.tick(now) {
            events.extend(self.open_challenge(alarm));
        }
        events
    }

    /// An alarm reported due by the clock worker at `at`. The fired-this-minute
    /// table lives here, so a worker restarted mid-minute cannot fire it twice.
    pub fn handle_fired(&mut self, alarm: Alarm, at: NaiveDateTime) -> Vec<UiEvent> {
        if !self.clock.mark_fired(alarm.id, at) {
            debug!(target: "alarm", alarm_id = alarm.id, "Alarm already fired this minute; ignoring worker report");
            return Vec::new();
        }
        self.open_challenge(alarm)
    }

    /// Open a challenge for an alarm that came due and request its side effects.
    fn open_challenge(&mut self, alarm: Alarm) -> Vec<UiEvent> {
        if self.challenges.contains_key(&alarm.id) {
            debug!(target: "alarm", alarm_id = alarm.id, "Alarm already has an open challenge; not re-firing");
            return Vec::new();
        }

        let challenge = Challenge::start(alarm.id, alarm.difficulty, self.settings.required_solves, &mut self.rng);
        let view = challenge.view();
        self.challenges.insert(
            alarm.id,
            OpenChallenge { challenge, auto_delete: alarm.auto_delete },
        );
        info!(target: "alarm", alarm_id = alarm.id, time = %alarm.time, difficulty = ?alarm.difficulty, "Alarm fired; challenge opened");

        // effects run after the challenge exists so a failure cannot lose it
        self.fire_effects(&alarm);

        vec![
            UiEvent::AlarmFired { alarm },
            UiEvent::ChallengeUpdated { challenge: view },
        ]
    }

    fn fire_effects(&self, alarm: &Alarm) {
        let fx = self.effects.as_ref();
        guarded(alarm.id, "playback", || fx.play_looping(&alarm.sound, alarm.volume));
        if alarm.vibration {
            guarded(alarm.id, "vibration", || fx.vibrate(&self.settings.vibration_pattern));
        }
        let time = alarm.time.to_string();
        let label = alarm.label.as_deref().unwrap_or("Time to wake up");
        let text = fill_template(&self.settings.notification_template, &[("time", &time), ("label", label)]);
        guarded(alarm.id, "notification", || fx.show_notification(&text));
    }

    /// Grade an answer for the alarm's open challenge.
    pub fn submit_answer(&mut self, alarm_id: AlarmId, answer: &str) -> Result<AnswerReport, AlarmError> {
        let open = self
            .challenges
            .get_mut(&alarm_id)
            .ok_or(AlarmError::UnknownChallenge(alarm_id))?;
        let outcome = open.challenge.submit_answer(answer, &mut self.rng);

        let report = match outcome {
            AnswerOutcome::Wrong => {
                debug!(target: "challenge", alarm_id, "Wrong answer");
                AnswerReport { outcome, events: vec![UiEvent::WrongAnswer { alarm_id }], follow_up: None }
            }
            AnswerOutcome::Correct => {
                let view = open.challenge.view();
                debug!(target: "challenge", alarm_id, solved = view.solved_count, required = view.required_count, "Correct answer");
                AnswerReport { outcome, events: vec![UiEvent::ChallengeUpdated { challenge: view }], follow_up: None }
            }
            AnswerOutcome::Complete => {
                let auto_delete = open.auto_delete;
                self.challenges.remove(&alarm_id);
                self.silence_if_idle(alarm_id);
                let follow_up = self.post_fire_action(alarm_id, auto_delete);
                info!(target: "challenge", alarm_id, ?follow_up, "Challenge complete; alarm dismissed");
                AnswerReport { outcome, events: vec![UiEvent::ChallengeComplete { alarm_id }], follow_up }
            }
        };
        Ok(report)
    }

    /// Drop a challenge without solving it (e.g. its alarm was deleted).
    pub fn cancel_challenge(&mut self, alarm_id: AlarmId) -> Option<UiEvent> {
        self.challenges.remove(&alarm_id)?;
        self.silence_if_idle(alarm_id);
        info!(target: "challenge", alarm_id, "Challenge cancelled");
        Some(UiEvent::ChallengeCancelled { alarm_id })
    }

    /// Sound is shared between alarms; only stop it when nothing is ringing.
    fn silence_if_idle(&self, alarm_id: AlarmId) {
        if self.challenges.is_empty() {
            let fx = self.effects.as_ref();
            guarded(alarm_id, "stop", || fx.stop_playback());
        }
    }

    /// Current `autoDelete` wins if the alarm is still in the snapshot; an
    /// alarm that left the snapshot is gone from the store, so nothing is sent.
    fn post_fire_action(&self, alarm_id: AlarmId, fired_auto_delete: bool) -> Option<PostFireAction> {
        let Some(alarm) = self.clock.alarms().iter().find(|a| a.id == alarm_id) else {
            warn!(target: "challenge", alarm_id, auto_delete = fired_auto_delete, "Completed challenge for an alarm no longer in the snapshot; no store request");
            return None;
        };
        Some(if alarm.auto_delete {
            PostFireAction::Delete(alarm_id)
        } else {
            PostFireAction::Disable(alarm_id)
        })
    }
}

/// Run one side effect; errors and panics are logged and swallowed.
fn guarded<F>(alarm_id: AlarmId, what: &'static str, f: F)
where
    F: FnOnce() -> Result<(), EffectError>,
{
    let result = panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or(Err(EffectError::Panicked(what)));
    if let Err(e) = result {
        warn!(target: "alarm", alarm_id, effect = what, error = %e, "Side effect failed; challenge unaffected");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::challenge::ChallengeState;
    use crate::domain::Day;
    use crate::evaluator::tests::{alarm, monday};

    /// Records effect calls; optionally fails or panics on every one.
    #[derive(Default)]
    pub(crate) struct RecordingEffects {
        pub calls: Mutex<Vec<&'static str>>,
        pub fail: bool,
        pub panic: bool,
    }

    impl RecordingEffects {
        fn record(&self, what: &'static str) -> Result<(), EffectError> {
            self.calls.lock().unwrap().push(what);
            if self.panic {
                panic!("sound backend exploded");
            }
            if self.fail {
                return Err(EffectError::NoListener(what));
            }
            Ok(())
        }
    }

    impl AlarmEffects for RecordingEffects {
        fn play_looping(&self, _: &crate::domain::SoundRef, _: u8) -> Result<(), EffectError> {
            self.record("play")
        }
        fn stop_playback(&self) -> Result<(), EffectError> {
            self.record("stop")
        }
        fn vibrate(&self, _: &[u32]) -> Result<(), EffectError> {
            self.record("vibrate")
        }
        fn show_notification(&self, _: &str) -> Result<(), EffectError> {
            self.record("notify")
        }
    }

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            required_solves: 3,
            vibration_pattern: vec![200],
            notification_template: "{time} {label}".into(),
        }
    }

    fn scheduler(fx: Arc<RecordingEffects>) -> Scheduler {
        Scheduler::with_rng(fx, settings(), StdRng::seed_from_u64(42))
    }

    fn expected(s: &Scheduler, id: AlarmId) -> String {
        let p = s.challenges[&id].challenge.current_problem().unwrap();
        p.expected_answer().to_string()
    }

    fn fired_ids(events: &[UiEvent]) -> Vec<AlarmId> {
        events
            .iter()
            .filter_map(|e| match e {
                UiEvent::AlarmFired { alarm } => Some(alarm.id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn monday_seven_oclock_end_to_end() {
        let fx = Arc::new(RecordingEffects::default());
        let mut s = scheduler(fx.clone());
        s.update_alarms(vec![alarm(1, "07:00", &[Day::Mon])]);

        let events = s.tick(monday(7, 0, 0));
        assert_eq!(fired_ids(&events), vec![1]);
        let view = s.challenges().pop().unwrap();
        assert_eq!(view.solved_count, 0);
        let question = view.question.unwrap();
        assert!(question.contains(" + ") || question.contains(" - "), "{question}");

        for _ in 0..2 {
            let r = s.submit_answer(1, &expected(&s, 1)).unwrap();
            assert_eq!(r.outcome, AnswerOutcome::Correct);
        }
        let done = s.submit_answer(1, &expected(&s, 1)).unwrap();
        assert_eq!(done.outcome, AnswerOutcome::Complete);
        assert_eq!(done.follow_up, Some(PostFireAction::Disable(1)));
        assert_eq!(done.events, vec![UiEvent::ChallengeComplete { alarm_id: 1 }]);
        assert!(!s.has_challenge(1));

        // still 07:00 on the same day: no second firing
        assert!(s.tick(monday(7, 0, 30)).is_empty());
        assert_eq!(fx.calls.lock().unwrap().as_slice(), &["play", "notify", "stop"]);
    }

    #[test]
    fn worker_reports_after_completion_do_not_refire() {
        let mut s = scheduler(Arc::new(RecordingEffects::default()));
        let a = alarm(1, "07:00", &[Day::Mon]);
        s.update_alarms(vec![a.clone()]);

        assert_eq!(fired_ids(&s.handle_fired(a.clone(), monday(7, 0, 15))), vec![1]);
        for _ in 0..3 {
            s.submit_answer(1, &expected(&s, 1)).unwrap();
        }
        assert!(!s.has_challenge(1));

        // a replacement worker re-evaluates the same minute
        assert!(s.handle_fired(a.clone(), monday(7, 0, 16)).is_empty());
        // so does the inline clock after a fallback
        assert!(s.tick(monday(7, 0, 17)).is_empty());
        assert!(s.challenges().is_empty());

        let next_week = monday(7, 0, 15) + chrono::Duration::days(7);
        assert_eq!(fired_ids(&s.handle_fired(a, next_week)), vec![1]);
    }

    #[test]
    fn auto_delete_alarm_requests_deletion() {
        let mut s = scheduler(Arc::new(RecordingEffects::default()));
        let mut a = alarm(1, "07:00", &[Day::Mon]);
        a.auto_delete = true;
        s.update_alarms(vec![a]);
        s.tick(monday(7, 0, 5));

        let mut last = None;
        for _ in 0..3 {
            last = Some(s.submit_answer(1, &expected(&s, 1)).unwrap());
        }
        assert_eq!(last.unwrap().follow_up, Some(PostFireAction::Delete(1)));
    }

    #[test]
    fn wrong_answers_do_not_advance() {
        let mut s = scheduler(Arc::new(RecordingEffects::default()));
        s.update_alarms(vec![alarm(1, "07:00", &[Day::Mon])]);
        s.tick(monday(7, 0, 0));

        let before = s.challenges()[0].question.clone();
        let r = s.submit_answer(1, "not a number").unwrap();
        assert_eq!(r.outcome, AnswerOutcome::Wrong);
        assert_eq!(r.events, vec![UiEvent::WrongAnswer { alarm_id: 1 }]);
        let after = &s.challenges()[0];
        assert_eq!(after.solved_count, 0);
        assert_eq!(after.question, before);
        assert_eq!(after.state, ChallengeState::AwaitingAnswer);
    }

    #[test]
    fn failing_or_panicking_effects_still_open_the_challenge() {
        for fx in [
            RecordingEffects { fail: true, ..Default::default() },
            RecordingEffects { panic: true, ..Default::default() },
        ] {
            let fx = Arc::new(fx);
            let mut s = scheduler(fx.clone());
            let mut a = alarm(1, "07:00", &[Day::Mon]);
            a.vibration = true;
            s.update_alarms(vec![a]);

            let events = s.tick(monday(7, 0, 0));
            assert_eq!(fired_ids(&events), vec![1]);
            assert!(s.has_challenge(1));
            assert_eq!(fx.calls.lock().unwrap().as_slice(), &["play", "vibrate", "notify"]);
        }
    }

    #[test]
    fn sunday_alarm_ignores_monday() {
        let mut s = scheduler(Arc::new(RecordingEffects::default()));
        s.update_alarms(vec![alarm(1, "07:00", &[Day::Sun])]);
        assert!(s.tick(monday(7, 0, 0)).is_empty());
    }

    #[test]
    fn shared_time_alarms_get_separate_challenges() {
        let fx = Arc::new(RecordingEffects::default());
        let mut s = scheduler(fx.clone());
        s.update_alarms(vec![alarm(1, "07:00", &[Day::Mon]), alarm(2, "07:00", &[Day::Mon])]);
        assert_eq!(fired_ids(&s.tick(monday(7, 0, 0))), vec![1, 2]);
        assert_eq!(s.challenges().len(), 2);

        for _ in 0..3 {
            s.submit_answer(1, &expected(&s, 1)).unwrap();
        }
        // alarm 2 is still ringing, so playback was not stopped
        assert!(!fx.calls.lock().unwrap().contains(&"stop"));
        assert!(s.has_challenge(2));
    }

    #[test]
    fn open_challenge_blocks_refire_next_week_and_survives_removal() {
        let mut s = scheduler(Arc::new(RecordingEffects::default()));
        s.update_alarms(vec![alarm(1, "07:00", &[Day::Mon])]);
        s.tick(monday(7, 0, 0));
        let session = s.challenges()[0].session_id;

        let next_monday = monday(7, 0, 0) + chrono::Duration::days(7);
        assert!(s.tick(next_monday).is_empty());
        assert_eq!(s.challenges()[0].session_id, session);

        s.update_alarms(Vec::new());
        assert!(s.has_challenge(1));
        let mut last = None;
        for _ in 0..3 {
            last = Some(s.submit_answer(1, &expected(&s, 1)).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(last.outcome, AnswerOutcome::Complete);
        assert_eq!(last.follow_up, None);
    }

    #[test]
    fn unknown_and_cancelled_challenges() {
        let mut s = scheduler(Arc::new(RecordingEffects::default()));
        assert!(matches!(s.submit_answer(9, "1"), Err(AlarmError::UnknownChallenge(9))));

        s.update_alarms(vec![alarm(9, "07:00", &[Day::Mon])]);
        s.tick(monday(7, 0, 0));
        assert_eq!(s.cancel_challenge(9), Some(UiEvent::ChallengeCancelled { alarm_id: 9 }));
        assert_eq!(s.cancel_challenge(9), None);
    }
}
