//! Per-zone daily scheduler.
//!
//! While running, a single task owns the zone's [`Schedule`] and is the only
//! code that mutates it or decides what fires next. Callers talk to it through
//! a command channel; queries get their answer over a oneshot. While stopped,
//! the same state is held by the handle and mutated in place.

use std::{sync::Arc, time::Duration};

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    clock::{self, Clock},
    dispatch::Dispatcher,
    event::{Action, Event},
    schedule::{Firing, Schedule},
};

/// How long the loop sleeps when nothing is scheduled before looking again.
fn idle_wake() -> TimeDelta {
    TimeDelta::seconds(24 * 60 * 60)
}

/// Longest boost accepted; anything longer is cut to this.
fn max_boost() -> TimeDelta {
    TimeDelta::seconds(366 * 24 * 60 * 60)
}

enum Command {
    Add(Event),
    Remove(Event),
    Boost(Duration),
    CancelBoost,
    ReadEvents(oneshot::Sender<Vec<Event>>),
    NextEvent(oneshot::Sender<Option<Event>>),
    Boosted(oneshot::Sender<bool>),
    Stop,
}

/// The authoritative scheduling state.
struct Engine {
    zone: String,
    clock: Arc<dyn Clock>,
    sink: Dispatcher<Action>,
    schedule: Schedule,
    boost_until: Option<NaiveDateTime>,
    pending: Option<Firing>,
    last_fired: Option<NaiveDateTime>,
}

enum Lifecycle {
    Stopped(Box<Engine>),
    Running {
        commands: mpsc::UnboundedSender<Command>,
        task: JoinHandle<Engine>,
    },
}

pub struct Scheduler {
    zone: String,
    clock: Arc<dyn Clock>,
    sink: Dispatcher<Action>,
    lifecycle: Mutex<Option<Lifecycle>>,
}

impl Scheduler {
    /// Creates a stopped scheduler that reports fired actions to `sink`.
    pub fn new(zone: impl Into<String>, clock: Arc<dyn Clock>, sink: Dispatcher<Action>) -> Self {
        let zone = zone.into();
        let engine = Engine::new(zone.clone(), clock.clone(), sink.clone());
        Self {
            zone,
            clock,
            sink,
            lifecycle: Mutex::new(Some(Lifecycle::Stopped(Box::new(engine)))),
        }
    }

    /// Applies the action that should already be in force, then starts the
    /// run loop. No-op when already running.
    pub async fn start(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let mut engine = match lifecycle.take() {
            Some(Lifecycle::Stopped(engine)) => *engine,
            running @ Some(Lifecycle::Running { .. }) => {
                *lifecycle = running;
                return;
            }
            None => self.fresh_engine(),
        };

        engine.apply_current();

        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(engine.run(rx));
        info!(zone = %self.zone, "scheduler started");
        *lifecycle = Some(Lifecycle::Running { commands, task });
    }

    /// Stops the run loop and waits for it to hand its state back. No-op when
    /// already stopped.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        let (commands, task) = match lifecycle.take() {
            Some(Lifecycle::Running { commands, task }) => (commands, task),
            other => {
                *lifecycle = other;
                return;
            }
        };

        let _ = commands.send(Command::Stop);
        let engine = match task.await {
            Ok(engine) => engine,
            Err(err) => {
                error!(zone = %self.zone, "scheduler task failed, schedule lost: {err}");
                self.fresh_engine()
            }
        };
        info!(zone = %self.zone, "scheduler stopped");
        *lifecycle = Some(Lifecycle::Stopped(Box::new(engine)));
    }

    pub async fn running(&self) -> bool {
        matches!(
            *self.lifecycle.lock().await,
            Some(Lifecycle::Running { .. })
        )
    }

    pub async fn add_event(&self, event: Event) {
        self.mutate(Command::Add(event), |engine| engine.add(event))
            .await;
    }

    /// Removes every entry equal to `event`. Nothing matching is not an error.
    pub async fn remove_event(&self, event: Event) {
        self.mutate(Command::Remove(event), |engine| engine.remove(&event))
            .await;
    }

    /// Forces demand on for `duration`, replacing any boost in progress.
    /// Durations beyond a year are cut to a year.
    pub async fn boost(&self, duration: Duration) {
        self.mutate(Command::Boost(duration), |engine| engine.boost(duration))
            .await;
    }

    /// Ends any boost and re-applies the demand the schedule calls for now.
    /// No off edge is sent first: if the schedule calls for heat, demand
    /// stays on without a gap.
    pub async fn cancel_boost(&self) {
        self.mutate(Command::CancelBoost, Engine::cancel_boost).await;
    }

    /// A copy of the schedule, sorted by time of day.
    pub async fn read_events(&self) -> Vec<Event> {
        self.query(Command::ReadEvents, |engine| {
            engine.schedule.events().to_vec()
        })
        .await
        .unwrap_or_default()
    }

    /// The next event due after now; while boosted, the boost's end.
    pub async fn next_event(&self) -> Option<Event> {
        self.query(Command::NextEvent, |engine| {
            let now = engine.clock.now();
            engine.next_event(now)
        })
        .await
        .flatten()
    }

    pub async fn boosted(&self) -> bool {
        self.query(Command::Boosted, |engine| engine.boost_until.is_some())
            .await
            .unwrap_or(false)
    }

    fn fresh_engine(&self) -> Engine {
        Engine::new(self.zone.clone(), self.clock.clone(), self.sink.clone())
    }

    async fn mutate(&self, command: Command, apply: impl FnOnce(&mut Engine)) {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.as_mut() {
            Some(Lifecycle::Running { commands, .. }) => {
                if commands.send(command).is_err() {
                    error!(zone = %self.zone, "scheduler loop is gone, command dropped");
                }
            }
            Some(Lifecycle::Stopped(engine)) => apply(&mut **engine),
            None => {}
        }
    }

    async fn query<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
        read: impl FnOnce(&Engine) -> T,
    ) -> Option<T> {
        let lifecycle = self.lifecycle.lock().await;
        match lifecycle.as_ref() {
            Some(Lifecycle::Running { commands, .. }) => {
                let (tx, rx) = oneshot::channel();
                commands.send(command(tx)).ok()?;
                rx.await.ok()
            }
            Some(Lifecycle::Stopped(engine)) => Some(read(&**engine)),
            None => None,
        }
    }
}

impl Engine {
    fn new(zone: String, clock: Arc<dyn Clock>, sink: Dispatcher<Action>) -> Self {
        Self {
            zone,
            clock,
            sink,
            schedule: Schedule::default(),
            boost_until: None,
            pending: None,
            last_fired: None,
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> Self {
        loop {
            let now = self.clock.now();
            if self.pending.is_none() {
                self.pending = self.schedule.next_fire(self.fire_after(now));
                if let Some(firing) = &self.pending {
                    debug!(zone = %self.zone, at = %firing.at, "next schedule wake-up");
                }
            }

            let wake_at = [self.pending.as_ref().map(|f| f.at), self.boost_until]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or_else(|| now + idle_wake());

            tokio::select! {
                () = tokio::time::sleep_until(clock::deadline(now, wake_at)) => {
                    self.on_wake(wake_at);
                }
                command = commands.recv() => match command {
                    Some(Command::Stop) | None => break,
                    Some(command) => self.handle(command),
                },
            }
        }

        self.pending = None;
        self
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add(event) => self.add(event),
            Command::Remove(event) => self.remove(&event),
            Command::Boost(duration) => self.boost(duration),
            Command::CancelBoost => self.cancel_boost(),
            Command::ReadEvents(reply) => {
                let _ = reply.send(self.schedule.events().to_vec());
            }
            Command::NextEvent(reply) => {
                let now = self.clock.now();
                let _ = reply.send(self.next_event(now));
            }
            Command::Boosted(reply) => {
                let _ = reply.send(self.boost_until.is_some());
            }
            Command::Stop => {}
        }
    }

    fn on_wake(&mut self, wake_at: NaiveDateTime) {
        if let Some(firing) = self.pending.take_if(|firing| firing.at <= wake_at) {
            self.last_fired = Some(firing.at);
            self.fire(firing);
        }

        if self.boost_until.is_some_and(|until| until <= wake_at) {
            self.boost_until = None;
            let demand = self.scheduled_demand(wake_at);
            info!(zone = %self.zone, demand, "boost expired");
            self.sink.send(Action::from_demand(demand));
        }
    }

    fn fire(&self, firing: Firing) {
        for event in firing.events {
            if self.boost_until.is_none() {
                info!(zone = %self.zone, %event, "schedule event fired");
                self.sink.send(event.action());
            } else if event.action().thermostat().is_some() {
                info!(zone = %self.zone, %event, "schedule event fired while boosted, demand held on");
                self.sink.send(event.action().forced_on());
            } else {
                debug!(zone = %self.zone, %event, "schedule event suppressed by boost");
            }
        }
    }

    /// Startup: put the output where it would be had we been running all along.
    fn apply_current(&mut self) {
        let now = self.clock.now();
        self.pending = None;
        self.last_fired = None;

        if self.boost_until.is_some_and(|until| until <= now) {
            self.boost_until = None;
        }

        let current = self.schedule.current_event(now).map(Event::action);
        let action = match (current, self.boost_until) {
            (Some(action), Some(_)) => action.forced_on(),
            (None, Some(_)) => Action::on(),
            (Some(action), None) => action,
            (None, None) => return,
        };
        info!(zone = %self.zone, %action, "applying current schedule state");
        self.sink.send(action);
    }

    fn add(&mut self, event: Event) {
        self.schedule.insert(event);
        self.refresh_pending();
    }

    fn remove(&mut self, event: &Event) {
        if self.schedule.remove(event) > 0 {
            self.refresh_pending();
        }
    }

    /// Drops the pending wake-up if the schedule change moved it.
    fn refresh_pending(&mut self) {
        let Some(pending) = &self.pending else {
            return;
        };
        let candidate = self.schedule.next_fire(self.fire_after(self.clock.now()));
        if candidate.as_ref() != Some(pending) {
            debug!(zone = %self.zone, "pending wake-up changed, recomputing");
            self.pending = None;
        }
    }

    fn boost(&mut self, duration: Duration) {
        let now = self.clock.now();
        let requested = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        if requested > max_boost() {
            warn!(zone = %self.zone, ?duration, "boost too long, capping");
        }
        let until = now
            .checked_add_signed(requested.min(max_boost()))
            .unwrap_or(NaiveDateTime::MAX);
        self.boost_until = Some(until);
        info!(zone = %self.zone, %until, "boost started");
        self.sink.send(Action::on());
    }

    fn cancel_boost(&mut self) {
        let now = self.clock.now();
        if self.boost_until.take().is_some() {
            info!(zone = %self.zone, "boost cancelled");
        }
        self.sink.send(Action::from_demand(self.scheduled_demand(now)));
    }

    fn scheduled_demand(&self, at: NaiveDateTime) -> bool {
        self.schedule
            .current_event(at)
            .is_some_and(|event| event.action().demand())
    }

    fn next_event(&self, now: NaiveDateTime) -> Option<Event> {
        if let Some(until) = self.boost_until {
            let action = Action::from_demand(self.scheduled_demand(until));
            return Event::new(until.hour(), until.minute(), action).ok();
        }
        self.schedule
            .next_fire(self.fire_after(now))
            .and_then(|firing| firing.events.first().copied())
    }

    /// Never look for fire points at or before the last one already applied.
    fn fire_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        self.last_fired.map_or(now, |fired| fired.max(now))
    }
}
