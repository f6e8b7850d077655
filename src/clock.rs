//! Clock checking: the fired-this-minute bookkeeping and the background worker.
//!
//! The worker is a separate execution context. It only ever exchanges plain
//! messages with the service: the full alarm list goes in (`SetAlarms`), one
//! alarm at a time comes out (`AlarmFired`). Nothing is shared by reference.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument};

use crate::domain::{Alarm, AlarmId};
use crate::error::AlarmError;
use crate::evaluator::{evaluate, MinuteStamp};

/// Source of local wall-clock time.
pub type WallClock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub fn local_clock() -> WallClock {
    Arc::new(|| Local::now().naive_local())
}

/// Alarm snapshot plus the per-alarm record of the minute it last fired in.
#[derive(Debug, Default)]
pub struct ClockState {
    alarms: Vec<Alarm>,
    fired: HashMap<AlarmId, MinuteStamp>,
    minute: Option<MinuteStamp>,
}

impl ClockState {
    pub fn new(alarms: Vec<Alarm>) -> Self {
        Self { alarms, ..Self::default() }
    }

    /// Replace the snapshot. Takes effect on the next tick; firings already
    /// recorded for this minute are kept.
    pub fn set_alarms(&mut self, alarms: Vec<Alarm>) {
        self.alarms = alarms;
    }

    pub fn alarms(&self) -> &[Alarm] {
        &self.alarms
    }

    fn roll(&mut self, now: NaiveDateTime) -> MinuteStamp {
        let stamp = MinuteStamp::of(now);
        if self.minute != Some(stamp) {
            // lazy cleanup: only entries for the current minute matter
            self.fired.retain(|_, s| *s == stamp);
            self.minute = Some(stamp);
        }
        stamp
    }

    /// Record that `alarm_id` fired in the minute of `at`. False if it
    /// already fired in that minute.
    pub fn mark_fired(&mut self, alarm_id: AlarmId, at: NaiveDateTime) -> bool {
        let stamp = self.roll(at);
        self.fired.insert(alarm_id, stamp).is_none()
    }

    /// Evaluate `now` and record the minute for every alarm that comes due.
    pub fn tick(&mut self, now: NaiveDateTime) -> Vec<Alarm> {
        let stamp = self.roll(now);
        let already: HashSet<AlarmId> = self.fired.keys().copied().collect();
        let due = evaluate(now, &self.alarms, &already);
        let mut out = Vec::with_capacity(due.len());
        for id in due {
            self.fired.insert(id, stamp);
            if let Some(alarm) = self.alarms.iter().find(|a| a.id == id) {
                out.push(alarm.clone());
            }
        }
        out
    }
}

/// Messages into the worker.
#[derive(Debug)]
pub enum ClockCommand {
    SetAlarms(Vec<Alarm>),
}

/// Messages out of the worker.
#[derive(Debug)]
pub enum ClockEvent {
    /// Sent once, before the first tick.
    Ready,
    /// An alarm came due at the given wall-clock time.
    AlarmFired(Alarm, NaiveDateTime),
}

/// Everything a worker needs to start.
#[derive(Clone)]
pub struct ClockSpec {
    pub interval: Duration,
    pub alarms: Vec<Alarm>,
    pub wall_clock: WallClock,
}

/// Starts a worker. Swappable so the service can be tested against failures.
pub type SpawnClock = fn(ClockSpec) -> Result<ClockLink, AlarmError>;

/// The service side of a running worker: a typed send / on_message pair.
pub struct ClockLink {
    commands: mpsc::UnboundedSender<ClockCommand>,
    events: mpsc::UnboundedReceiver<ClockEvent>,
    handle: JoinHandle<()>,
}

impl ClockLink {
    pub fn new(
        commands: mpsc::UnboundedSender<ClockCommand>,
        events: mpsc::UnboundedReceiver<ClockEvent>,
        handle: JoinHandle<()>,
    ) -> Self {
        Self { commands, events, handle }
    }

    /// False if the worker is gone.
    pub fn send(&self, cmd: ClockCommand) -> bool {
        self.commands.send(cmd).is_ok()
    }

    /// Next message from the worker; `None` once it has exited.
    pub async fn on_message(&mut self) -> Option<ClockEvent> {
        self.events.recv().await
    }

    /// Abort the worker. No tick runs after this returns.
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Spawn the clock worker on the current tokio runtime.
pub fn spawn_worker(spec: ClockSpec) -> Result<ClockLink, AlarmError> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| AlarmError::WorkerStart(e.to_string()))?;
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel();
    let handle = runtime.spawn(run_worker(spec, cmd_rx, evt_tx));
    Ok(ClockLink::new(cmd_tx, evt_rx, handle))
}

#[instrument(level = "info", skip_all, fields(interval_ms = spec.interval.as_millis() as u64, alarms = spec.alarms.len()))]
async fn run_worker(
    spec: ClockSpec,
    mut commands: mpsc::UnboundedReceiver<ClockCommand>,
    events: mpsc::UnboundedSender<ClockEvent>,
) {
    let mut state = ClockState::new(spec.alarms);
    let mut ticker = tokio::time::interval(spec.interval);
    // a suspended process resumes with one evaluation, not a burst of catch-up ticks
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    if events.send(ClockEvent::Ready).is_err() {
        return;
    }
    info!(target: "alarm", "Clock worker running");

    loop {
        tokio::select! {
            biased;
            cmd = commands.recv() => match cmd {
                Some(ClockCommand::SetAlarms(alarms)) => {
                    debug!(target: "alarm", count = alarms.len(), "Worker received alarm snapshot");
                    state.set_alarms(alarms);
                }
                None => break,
            },
            _ = ticker.tick() => {
                let now = (spec.wall_clock)();
                for alarm in state.tick(now) {
                    if events.send(ClockEvent::AlarmFired(alarm, now)).is_err() {
                        return;
                    }
                }
            }
        }
    }
    info!(target: "alarm", "Clock worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Day;
    use crate::evaluator::tests::{alarm, monday};

    #[test]
    fn repeated_ticks_in_one_minute_fire_once() {
        let mut clock = ClockState::new(vec![alarm(1, "07:00", &[Day::Mon])]);
        let fired: usize = (0..60).map(|s| clock.tick(monday(7, 0, s)).len()).sum();
        assert_eq!(fired, 1);
        assert!(clock.tick(monday(7, 1, 0)).is_empty());
    }

    #[test]
    fn old_minutes_are_forgotten() {
        let mut clock = ClockState::new(vec![alarm(1, "07:00", &[Day::Mon])]);
        assert_eq!(clock.tick(monday(7, 0, 0)).len(), 1);
        clock.tick(monday(7, 5, 0));
        assert!(clock.fired.is_empty());
    }

    #[test]
    fn snapshot_update_keeps_this_minutes_firings() {
        let mut clock = ClockState::new(vec![alarm(1, "07:00", &[Day::Mon])]);
        assert_eq!(clock.tick(monday(7, 0, 1)).len(), 1);
        clock.set_alarms(vec![alarm(1, "07:00", &[Day::Mon]), alarm(2, "07:00", &[Day::Mon])]);
        let second: Vec<_> = clock.tick(monday(7, 0, 2)).into_iter().map(|a| a.id).collect();
        assert_eq!(second, vec![2]);
    }

    #[test]
    fn mark_fired_accepts_each_alarm_once_per_minute() {
        let mut clock = ClockState::default();
        assert!(clock.mark_fired(1, monday(7, 0, 5)));
        assert!(!clock.mark_fired(1, monday(7, 0, 40)));
        assert!(clock.mark_fired(2, monday(7, 0, 40)));
        assert!(clock.mark_fired(1, monday(7, 1, 0)));
    }

    #[test]
    fn tick_honours_marks_from_elsewhere() {
        let mut clock = ClockState::new(vec![alarm(1, "07:00", &[Day::Mon])]);
        assert!(clock.mark_fired(1, monday(7, 0, 3)));
        assert!(clock.tick(monday(7, 0, 4)).is_empty());
    }

    #[tokio::test]
    async fn worker_reports_ready_then_fires() {
        let wall_clock: WallClock = Arc::new(|| monday(7, 0, 10));
        let mut link = spawn_worker(ClockSpec {
            interval: Duration::from_millis(10),
            alarms: Vec::new(),
            wall_clock,
        })
        .unwrap();

        assert!(matches!(link.on_message().await, Some(ClockEvent::Ready)));
        assert!(link.send(ClockCommand::SetAlarms(vec![alarm(4, "07:00", &[Day::Mon])])));

        let fired = tokio::time::timeout(Duration::from_secs(2), link.on_message())
            .await
            .unwrap();
        assert!(matches!(fired, Some(ClockEvent::AlarmFired(a, _)) if a.id == 4));

        // same minute: nothing more
        let quiet = tokio::time::timeout(Duration::from_millis(100), link.on_message()).await;
        assert!(quiet.is_err());
        link.shutdown();
    }
}
