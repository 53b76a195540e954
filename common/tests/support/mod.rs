#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{NaiveDateTime, NaiveTime};
use heatzone_common::{Action, Clock, Dispatcher, Event, SimulatedClock};

/// Lets spawned tasks drain their queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Sleeps in virtual time until the clock reads `hour:minute` (same day).
pub async fn advance_to(clock: &dyn Clock, hour: u32, minute: u32) {
    let now = clock.now();
    let target = now
        .date()
        .and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap());
    advance_until(clock, target).await;
}

pub async fn advance_until(clock: &dyn Clock, target: NaiveDateTime) {
    let wait = (target - clock.now()).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;
    settle().await;
}

pub fn event(hour: u32, minute: u32, on: bool) -> Event {
    Event::new(hour, minute, Action::from_demand(on)).unwrap()
}

#[derive(Clone, Default)]
pub struct Recorder {
    actions: Arc<Mutex<Vec<Action>>>,
}

impl Recorder {
    pub fn sink(&self) -> Dispatcher<Action> {
        let actions = self.actions.clone();
        Dispatcher::spawn("recorder", move |action| {
            actions.lock().unwrap().push(action);
        })
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn demands(&self) -> Vec<bool> {
        self.actions().into_iter().map(Action::demand).collect()
    }

    pub fn last_demand(&self) -> Option<bool> {
        self.actions().last().map(|action| action.demand())
    }
}

/// Counts how often the wall clock is consulted.
pub struct CountingClock {
    inner: SimulatedClock,
    reads: AtomicUsize,
}

impl CountingClock {
    pub fn new(inner: SimulatedClock) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl Clock for CountingClock {
    fn now(&self) -> NaiveDateTime {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.now()
    }
}
