//! Thread-safe front of a zone's [`Scheduler`].
//!
//! Keeps its own sorted copy of the events so reads never wait on the
//! scheduler loop, and turns fired actions into combiner demand plus any
//! bundled thermostat retarget.

use std::{
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    clock::Clock,
    combiner::DemandCombiner,
    dispatch::Dispatcher,
    error::ScheduleError,
    event::{Action, Event},
    schedule::Schedule,
    scheduler::Scheduler,
    thermostat::ThermostatLoop,
};

/// The zone's thermostat, if one is attached. Shared with the demand callback
/// so a thermostat attached later still receives scheduled retargets.
pub type ThermostatSlot = Arc<RwLock<Option<Arc<ThermostatLoop>>>>;

pub struct EventHandler {
    zone: String,
    scheduler: Scheduler,
    events: RwLock<Schedule>,
    // Keeps the copy and the scheduler applying mutations in the same order.
    mutations: Mutex<()>,
}

impl EventHandler {
    /// Must be called from within a tokio runtime.
    pub fn new(
        zone: impl Into<String>,
        clock: Arc<dyn Clock>,
        combiner: Arc<DemandCombiner>,
        thermostat: ThermostatSlot,
    ) -> Self {
        let zone = zone.into();
        let callback_zone = zone.clone();
        let sink = Dispatcher::spawn("schedule", move |action: Action| {
            combiner.on_schedule_demand(action.demand());

            let Some(adjustment) = action.thermostat() else {
                return;
            };
            let attached = read_slot(&thermostat).clone();
            match attached {
                Some(attached) => match attached.adjust(adjustment) {
                    Some(target) => info!(zone = %callback_zone, %target, "scheduled thermostat retarget"),
                    None => debug!(zone = %callback_zone, %adjustment, "scheduled retarget left target unchanged"),
                },
                None => debug!(zone = %callback_zone, %adjustment, "no thermostat to retarget"),
            }
        });

        Self {
            scheduler: Scheduler::new(zone.clone(), clock, sink),
            zone,
            events: RwLock::new(Schedule::default()),
            mutations: Mutex::new(()),
        }
    }

    pub async fn start(&self) {
        self.scheduler.start().await;
    }

    pub async fn stop(&self) {
        self.scheduler.stop().await;
    }

    pub async fn running(&self) -> bool {
        self.scheduler.running().await
    }

    pub async fn add_event(&self, event: Event) {
        let _guard = self.mutations.lock().await;
        self.write_events().insert(event);
        self.scheduler.add_event(event).await;
        debug!(zone = %self.zone, %event, "event added");
    }

    /// Validates the time of day, then adds the event.
    pub async fn add(&self, hour: u32, minute: u32, action: Action) -> Result<Event, ScheduleError> {
        let event = Event::new(hour, minute, action)?;
        self.add_event(event).await;
        Ok(event)
    }

    /// Removes every entry equal to `event`; returns how many matched.
    pub async fn remove_event(&self, event: Event) -> usize {
        let _guard = self.mutations.lock().await;
        let removed = self.write_events().remove(&event);
        if removed > 0 {
            self.scheduler.remove_event(event).await;
            debug!(zone = %self.zone, %event, removed, "event removed");
        }
        removed
    }

    /// Sorted snapshot; the caller owns it outright.
    pub fn read_events(&self) -> Vec<Event> {
        read_lock(&self.events).events().to_vec()
    }

    pub async fn next_event(&self) -> Option<Event> {
        self.scheduler.next_event().await
    }

    pub async fn boost(&self, duration: Duration) {
        self.scheduler.boost(duration).await;
    }

    /// Ends any boost and re-asserts the demand the schedule calls for now,
    /// forcing the combiner to re-evaluate. There is no off pulse in between,
    /// so a schedule that calls for heat keeps the output on.
    pub async fn cancel_boost(&self) {
        self.scheduler.cancel_boost().await;
    }

    pub async fn boosted(&self) -> bool {
        self.scheduler.boosted().await
    }

    fn write_events(&self) -> RwLockWriteGuard<'_, Schedule> {
        self.events
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

pub(crate) fn read_slot(slot: &ThermostatSlot) -> RwLockReadGuard<'_, Option<Arc<ThermostatLoop>>> {
    read_lock(slot.as_ref())
}
