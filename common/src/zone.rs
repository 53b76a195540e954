use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::info;

use crate::{
    clock::Clock,
    combiner::{DemandCombiner, Demands},
    config::ThermostatConfig,
    dispatch::Dispatcher,
    error::ZoneError,
    event::Event,
    event_handler::{read_slot, EventHandler, ThermostatSlot},
    output::Output,
    sensor::TemperatureSource,
    temperature::Temperature,
    thermostat::{ThermostatLoop, ThermostatStatus},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ZoneStatus {
    pub id: String,
    pub output: String,
    pub demand: bool,
    pub schedule_demand: bool,
    pub thermostat_demand: bool,
    pub boosted: bool,
    pub next_event: Option<Event>,
    pub thermostat: Option<ThermostatStatus>,
}

/// A heating circuit: one output, its schedule and an optional thermostat.
pub struct Zone {
    id: String,
    combiner: Arc<DemandCombiner>,
    events: EventHandler,
    thermostat: ThermostatSlot,
    /// Shared by every thermostat attached over the zone's life, so a
    /// replacement's demand is queued behind its predecessor's.
    thermostat_demand: Dispatcher<bool>,
}

impl Zone {
    /// Builds a stopped zone; add events, then [`start`](Self::start) it.
    /// Must be called from within a tokio runtime.
    pub fn new(id: impl Into<String>, output: Arc<dyn Output>, clock: Arc<dyn Clock>) -> Self {
        let id = id.into();
        let combiner = Arc::new(DemandCombiner::new(output));
        let thermostat: ThermostatSlot = Arc::new(RwLock::new(None));
        let events = EventHandler::new(id.clone(), clock, combiner.clone(), thermostat.clone());
        let thermostat_demand = {
            let combiner = combiner.clone();
            Dispatcher::spawn("thermostat", move |active: bool| {
                combiner.on_thermostat_demand(active);
            })
        };
        Self {
            id,
            combiner,
            events,
            thermostat,
            thermostat_demand,
        }
    }

    /// Follows `source` with a hysteresis thermostat, replacing any previous one.
    pub fn attach_thermostat(
        &self,
        source: &dyn TemperatureSource,
        target: Temperature,
        config: &ThermostatConfig,
    ) -> Result<Arc<ThermostatLoop>, ZoneError> {
        let notify = self.thermostat_demand.clone();
        let thermostat = ThermostatLoop::spawn(source, target, config, notify)
            .map(Arc::new)
            .map_err(|err| ZoneError::Subscription {
                zone: self.id.clone(),
                source: err,
            })?;

        let previous = self
            .thermostat
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(thermostat.clone());
        if let Some(previous) = previous {
            previous.close();
            // The old loop may have raised a demand after the new one announced.
            self.thermostat_demand.send(thermostat.active());
        }
        info!(
            zone = %self.id,
            source = source.id(),
            active = thermostat.active(),
            "thermostat attached"
        );
        Ok(thermostat)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> &EventHandler {
        &self.events
    }

    pub fn thermostat(&self) -> Option<Arc<ThermostatLoop>> {
        read_slot(&self.thermostat).clone()
    }

    pub fn demands(&self) -> Demands {
        self.combiner.demands()
    }

    pub async fn start(&self) {
        self.events.start().await;
    }

    /// Stops the schedule and detaches the thermostat.
    pub async fn close(&self) {
        self.events.stop().await;
        let thermostat = self
            .thermostat
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(thermostat) = thermostat {
            thermostat.close();
        }
        info!(zone = %self.id, "zone closed");
    }

    pub async fn status(&self) -> ZoneStatus {
        let demands = self.combiner.demands();
        ZoneStatus {
            id: self.id.clone(),
            output: self.combiner.output_id().to_string(),
            demand: demands.current,
            schedule_demand: demands.schedule,
            thermostat_demand: demands.thermostat,
            boosted: self.events.boosted().await,
            next_event: self.events.next_event().await,
            thermostat: self.thermostat().map(|thermostat| thermostat.status()),
        }
    }
}
