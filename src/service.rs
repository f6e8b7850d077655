//! The alarm service actor.
//!
//! One tokio task owns the `Scheduler`. HTTP and WebSocket handlers reach it
//! only through `AlarmServiceHandle` (an mpsc command channel with oneshot
//! replies) and observe it through a broadcast channel of `UiEvent`s.
//!
//! Clock checking runs in a separate worker task (see `clock`). If the worker
//! cannot be started it is retried once; after that the actor ticks the
//! scheduler itself so alarms are never silently dropped. A worker that dies
//! while running is recreated and handed the current snapshot.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::challenge::{AnswerOutcome, ChallengeView};
use crate::clock::{local_clock, spawn_worker, ClockCommand, ClockEvent, ClockLink, ClockSpec, SpawnClock, WallClock};
use crate::config::AppConfig;
use crate::domain::{Alarm, AlarmId, AlarmPatch, AlarmRecord};
use crate::effects::{AlarmEffects, BroadcastEffects};
use crate::error::AlarmError;
use crate::events::UiEvent;
use crate::scheduler::{PostFireAction, Scheduler, SchedulerSettings};
use crate::sounds::SoundCatalog;
use crate::store::AlarmStore;

const WORKER_START_ATTEMPTS: u32 = 2;
const COMMAND_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 256;

#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub tick_interval: Duration,
    pub worker_start_timeout: Duration,
    pub scheduler: SchedulerSettings,
    pub sounds: SoundCatalog,
}

impl From<&AppConfig> for ServiceSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            tick_interval: cfg.tick_interval(),
            worker_start_timeout: cfg.worker_start_timeout(),
            scheduler: SchedulerSettings {
                required_solves: cfg.required_solves,
                vibration_pattern: cfg.vibration_pattern.clone(),
                notification_template: cfg.notification_template.clone(),
            },
            sounds: cfg.sounds.clone(),
        }
    }
}

/// Replaceable collaborators. `Default` is the production wiring.
pub struct ServiceHooks {
    /// `None` forwards effects to UI clients over the event channel.
    pub effects: Option<Arc<dyn AlarmEffects>>,
    pub spawn_clock: SpawnClock,
    pub wall_clock: WallClock,
}

impl Default for ServiceHooks {
    fn default() -> Self {
        Self { effects: None, spawn_clock: spawn_worker, wall_clock: local_clock() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockMode {
    Stopped,
    Worker,
    Inline,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub mode: ClockMode,
    pub alarms: usize,
    pub challenges: Vec<ChallengeView>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerReply {
    pub outcome: AnswerOutcome,
    /// Current state; absent once the challenge is complete.
    pub challenge: Option<ChallengeView>,
}

enum Command {
    UpdateAlarms(Vec<Alarm>, oneshot::Sender<()>),
    ReloadAlarms(oneshot::Sender<Result<usize, AlarmError>>),
    SubmitAnswer {
        alarm_id: AlarmId,
        answer: String,
        reply: oneshot::Sender<Result<AnswerReply, AlarmError>>,
    },
    CancelChallenge(AlarmId, oneshot::Sender<bool>),
    Start(oneshot::Sender<ClockMode>),
    Stop(oneshot::Sender<()>),
    Status(oneshot::Sender<ServiceStatus>),
    /// Internal: the store was re-read off the actor. `generation` is the
    /// snapshot generation current when the read was started.
    Refreshed { generation: u64, alarms: Vec<Alarm> },
}

/// Cheap, cloneable entry point to the service.
#[derive(Clone)]
pub struct AlarmServiceHandle {
    tx: mpsc::Sender<Command>,
    events: broadcast::Sender<UiEvent>,
}

impl AlarmServiceHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, AlarmError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| AlarmError::ServiceUnavailable)?;
        rx.await.map_err(|_| AlarmError::ServiceUnavailable)
    }

    /// Replace the alarm snapshot. Takes effect on the next tick.
    pub async fn update_alarms(&self, alarms: Vec<Alarm>) -> Result<(), AlarmError> {
        self.request(|r| Command::UpdateAlarms(alarms, r)).await
    }

    /// Re-read the list from the store. Returns the number of valid alarms.
    pub async fn reload_alarms(&self) -> Result<usize, AlarmError> {
        self.request(Command::ReloadAlarms).await?
    }

    pub async fn submit_answer(&self, alarm_id: AlarmId, answer: String) -> Result<AnswerReply, AlarmError> {
        self.request(|reply| Command::SubmitAnswer { alarm_id, answer, reply }).await?
    }

    pub async fn cancel_challenge(&self, alarm_id: AlarmId) -> Result<bool, AlarmError> {
        self.request(|r| Command::CancelChallenge(alarm_id, r)).await
    }

    /// Start (or restart) the clock. Returns the mode it ended up in.
    pub async fn start(&self) -> Result<ClockMode, AlarmError> {
        self.request(Command::Start).await
    }

    /// Stop the clock. Idempotent; no tick runs after this returns.
    pub async fn stop(&self) -> Result<(), AlarmError> {
        self.request(Command::Stop).await
    }

    pub async fn status(&self) -> Result<ServiceStatus, AlarmError> {
        self.request(Command::Status).await
    }
}

enum Clock {
    Stopped,
    Worker(ClockLink),
    Inline(Interval),
}

enum Signal {
    Command(Option<Command>),
    Worker(Option<ClockEvent>),
    InlineTick,
}

struct AlarmService {
    scheduler: Scheduler,
    store: Arc<dyn AlarmStore>,
    settings: ServiceSettings,
    spawn_clock: SpawnClock,
    wall_clock: WallClock,
    clock: Clock,
    events: broadcast::Sender<UiEvent>,
    /// Bumped by every UI snapshot push. Store reads started before the
    /// latest push are stale and dropped.
    generation: u64,
    /// For follow-up work spawned off the actor to report back. Weak, so the
    /// actor still exits once every handle is dropped.
    self_tx: mpsc::WeakSender<Command>,
}

/// Spawn the service with production collaborators. The clock is not started.
pub fn spawn(settings: ServiceSettings, store: Arc<dyn AlarmStore>) -> AlarmServiceHandle {
    spawn_with(settings, store, ServiceHooks::default())
}

pub fn spawn_with(settings: ServiceSettings, store: Arc<dyn AlarmStore>, hooks: ServiceHooks) -> AlarmServiceHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let (events, _) = broadcast::channel(EVENT_QUEUE);
    let effects: Arc<dyn AlarmEffects> = match hooks.effects {
        Some(fx) => fx,
        None => Arc::new(BroadcastEffects::new(events.clone())),
    };

    let service = AlarmService {
        scheduler: Scheduler::new(effects, settings.scheduler.clone()),
        store,
        settings,
        spawn_clock: hooks.spawn_clock,
        wall_clock: hooks.wall_clock,
        clock: Clock::Stopped,
        events: events.clone(),
        generation: 0,
        self_tx: tx.downgrade(),
    };
    tokio::spawn(service.run(rx));
    AlarmServiceHandle { tx, events }
}

impl AlarmService {
    #[instrument(level = "info", name = "alarm_service", skip_all)]
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        info!(target: "alarm", "Alarm service running");
        loop {
            let signal = tokio::select! {
                cmd = rx.recv() => Signal::Command(cmd),
                sig = next_clock_signal(&mut self.clock) => sig,
            };
            match signal {
                Signal::Command(Some(cmd)) => self.handle(cmd).await,
                Signal::Command(None) => break,
                Signal::Worker(Some(ClockEvent::AlarmFired(alarm, at))) => {
                    let events = self.scheduler.handle_fired(alarm, at);
                    self.publish(events);
                }
                Signal::Worker(Some(ClockEvent::Ready)) => {}
                Signal::Worker(None) => {
                    warn!(target: "alarm", "Clock worker exited unexpectedly; restarting");
                    self.clock = Clock::Stopped;
                    self.start_clock().await;
                }
                Signal::InlineTick => {
                    let now = (self.wall_clock)();
                    let events = self.scheduler.tick(now);
                    self.publish(events);
                }
            }
        }
        self.stop_clock();
        info!(target: "alarm", "Alarm service stopped");
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::UpdateAlarms(alarms, reply) => {
                self.generation += 1;
                self.replace_snapshot(alarms);
                let _ = reply.send(());
            }
            Command::ReloadAlarms(reply) => self.spawn_reload(reply),
            Command::SubmitAnswer { alarm_id, answer, reply } => {
                let result = self.submit_answer(alarm_id, &answer);
                let _ = reply.send(result);
            }
            Command::CancelChallenge(alarm_id, reply) => {
                let cancelled = self.scheduler.cancel_challenge(alarm_id);
                let found = cancelled.is_some();
                self.publish(cancelled);
                let _ = reply.send(found);
            }
            Command::Start(reply) => {
                let mode = self.start_clock().await;
                let _ = reply.send(mode);
            }
            Command::Stop(reply) => {
                self.stop_clock();
                let _ = reply.send(());
            }
            Command::Status(reply) => {
                let _ = reply.send(ServiceStatus {
                    mode: self.mode(),
                    alarms: self.scheduler.alarms().len(),
                    challenges: self.scheduler.challenges(),
                });
            }
            Command::Refreshed { generation, alarms } => {
                if generation < self.generation {
                    debug!(target: "alarm", generation, current = self.generation, "Dropping store snapshot older than the last update");
                } else {
                    info!(target: "alarm", count = alarms.len(), "Alarm snapshot reloaded from store");
                    self.replace_snapshot(alarms);
                }
            }
        }
    }

    fn mode(&self) -> ClockMode {
        match self.clock {
            Clock::Stopped => ClockMode::Stopped,
            Clock::Worker(_) => ClockMode::Worker,
            Clock::Inline(_) => ClockMode::Inline,
        }
    }

    fn publish(&self, events: impl IntoIterator<Item = UiEvent>) {
        for event in events {
            // no subscribers is fine; the UI re-reads status when it connects
            let _ = self.events.send(event);
        }
    }

    fn replace_snapshot(&mut self, alarms: Vec<Alarm>) {
        if let Clock::Worker(link) = &self.clock {
            if !link.send(ClockCommand::SetAlarms(alarms.clone())) {
                // its event channel closes too; the run loop restarts it
                warn!(target: "alarm", "Clock worker unreachable while pushing snapshot");
            }
        }
        self.scheduler.update_alarms(alarms);
    }

    /// Read the store in a separate task so store latency never holds up a tick.
    /// The caller is answered once the snapshot is queued back to the actor.
    fn spawn_reload(&self, reply: oneshot::Sender<Result<usize, AlarmError>>) {
        let store = self.store.clone();
        let sounds = self.settings.sounds.clone();
        let tx = self.self_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = refresh(store.as_ref(), &sounds, &tx, generation).await;
            if let Err(e) = &result {
                warn!(target: "alarm", error = %e, "Alarm reload failed");
            }
            let _ = reply.send(result);
        });
    }

    fn submit_answer(&mut self, alarm_id: AlarmId, answer: &str) -> Result<AnswerReply, AlarmError> {
        let report = self.scheduler.submit_answer(alarm_id, answer)?;
        if let Some(action) = report.follow_up {
            self.apply_post_fire(action);
        }
        let challenge = match report.outcome {
            AnswerOutcome::Complete => None,
            _ => self.scheduler.challenges().into_iter().find(|c| c.alarm_id == alarm_id),
        };
        self.publish(report.events);
        Ok(AnswerReply { outcome: report.outcome, challenge })
    }

    /// Fire-and-forget: a failing store never reopens the challenge.
    fn apply_post_fire(&self, action: PostFireAction) {
        let store = self.store.clone();
        let sounds = self.settings.sounds.clone();
        let tx = self.self_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = match action {
                PostFireAction::Disable(id) => store.update_alarm(id, AlarmPatch::disable()).await.map(|_| ()),
                PostFireAction::Delete(id) => store.delete_alarm(id).await,
            };
            if let Err(e) = result {
                error!(target: "alarm", ?action, error = %e, "Post-fire store request failed");
                return;
            }
            debug!(target: "alarm", ?action, "Post-fire store request applied");
            if let Err(e) = refresh(store.as_ref(), &sounds, &tx, generation).await {
                warn!(target: "alarm", error = %e, "Could not reload alarms after post-fire request");
            }
        });
    }

    /// Replace any running clock, then try the worker and fall back to inline ticking.
    async fn start_clock(&mut self) -> ClockMode {
        self.stop_clock();
        for attempt in 1..=WORKER_START_ATTEMPTS {
            match self.launch_worker().await {
                Ok(link) => {
                    info!(target: "alarm", attempt, "Clock worker started");
                    self.clock = Clock::Worker(link);
                    return ClockMode::Worker;
                }
                Err(e) => warn!(target: "alarm", attempt, error = %e, "Clock worker failed to start"),
            }
        }
        error!(target: "alarm", "Clock worker unavailable; checking alarms inline");
        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.clock = Clock::Inline(ticker);
        ClockMode::Inline
    }

    async fn launch_worker(&self) -> Result<ClockLink, AlarmError> {
        let mut link = (self.spawn_clock)(ClockSpec {
            interval: self.settings.tick_interval,
            alarms: self.scheduler.alarms().to_vec(),
            wall_clock: self.wall_clock.clone(),
        })?;
        match tokio::time::timeout(self.settings.worker_start_timeout, link.on_message()).await {
            Ok(Some(ClockEvent::Ready)) => Ok(link),
            Ok(Some(other)) => {
                link.shutdown();
                Err(AlarmError::WorkerStart(format!("unexpected first message {:?}", other)))
            }
            Ok(None) => Err(AlarmError::WorkerStart("worker exited during startup".into())),
            Err(_) => {
                link.shutdown();
                Err(AlarmError::WorkerStart("no ready signal before timeout".into()))
            }
        }
    }

    fn stop_clock(&mut self) {
        match std::mem::replace(&mut self.clock, Clock::Stopped) {
            Clock::Worker(link) => {
                link.shutdown();
                info!(target: "alarm", "Clock worker stopped");
            }
            Clock::Inline(_) => info!(target: "alarm", "Inline clock stopped"),
            Clock::Stopped => {}
        }
    }
}

async fn next_clock_signal(clock: &mut Clock) -> Signal {
    match clock {
        Clock::Stopped => std::future::pending().await,
        Clock::Worker(link) => Signal::Worker(link.on_message().await),
        Clock::Inline(ticker) => {
            ticker.tick().await;
            Signal::InlineTick
        }
    }
}

/// Read the store and queue the result back to the actor. Returns the number
/// of valid alarms read.
async fn refresh(
    store: &dyn AlarmStore,
    sounds: &SoundCatalog,
    tx: &mpsc::WeakSender<Command>,
    generation: u64,
) -> Result<usize, AlarmError> {
    let alarms = to_alarms(store.list_alarms().await?, sounds);
    let count = alarms.len();
    let tx = tx.upgrade().ok_or(AlarmError::ServiceUnavailable)?;
    tx.send(Command::Refreshed { generation, alarms })
        .await
        .map_err(|_| AlarmError::ServiceUnavailable)?;
    Ok(count)
}

/// Records that fail validation are skipped; the store is not ours to reject.
fn to_alarms(records: Vec<AlarmRecord>, sounds: &SoundCatalog) -> Vec<Alarm> {
    records
        .into_iter()
        .filter_map(|rec| {
            let id = rec.id;
            Alarm::from_record(rec, sounds)
                .map_err(|e| error!(target: "alarm", alarm_id = id, error = %e, "Skipping invalid alarm record"))
                .ok()
        })
        .collect()
}
