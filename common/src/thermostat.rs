//! Hysteresis thermostat producing the zone's "call for heat" signal.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    config::ThermostatConfig,
    dispatch::Dispatcher,
    error::SourceError,
    event::ThermostatAction,
    sensor::TemperatureSource,
    temperature::Temperature,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThermostatStatus {
    pub target: Temperature,
    pub current: Option<Temperature>,
    pub active: bool,
}

/// The two-state hysteresis rule, without any I/O.
#[derive(Debug, Clone)]
pub struct ThermostatEngine {
    target: Temperature,
    current: Option<Temperature>,
    threshold: Temperature,
    active: bool,
}

impl ThermostatEngine {
    /// Starts active, whatever the reading; call [`evaluate`](Self::evaluate)
    /// to settle.
    pub fn new(target: Temperature, threshold: Temperature, current: Option<Temperature>) -> Self {
        Self {
            target,
            current,
            threshold,
            active: true,
        }
    }

    pub fn target(&self) -> Temperature {
        self.target
    }

    pub fn current(&self) -> Option<Temperature> {
        self.current
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn status(&self) -> ThermostatStatus {
        ThermostatStatus {
            target: self.target,
            current: self.current,
            active: self.active,
        }
    }

    /// Records a reading and re-evaluates. Returns whether the state flipped.
    pub fn update_reading(&mut self, current: Temperature) -> bool {
        self.current = Some(current);
        self.evaluate()
    }

    /// Retargets and re-evaluates. Returns whether the state flipped.
    pub fn set_target(&mut self, target: Temperature) -> bool {
        self.target = target;
        self.evaluate()
    }

    /// Below `target - threshold` calls for heat, above `target` stops it, and
    /// anything in between keeps the previous state.
    pub fn evaluate(&mut self) -> bool {
        let Some(current) = self.current else {
            return false;
        };

        let previous = self.active;
        if current < self.target - self.threshold {
            self.active = true;
        } else if current > self.target {
            self.active = false;
        }
        previous != self.active
    }
}

/// A [`ThermostatEngine`] fed by a temperature subscription. State changes are
/// reported through a dispatcher, never while the state lock is held.
pub struct ThermostatLoop {
    source_id: String,
    engine: Arc<Mutex<ThermostatEngine>>,
    notify: Dispatcher<bool>,
    task: JoinHandle<()>,
}

impl ThermostatLoop {
    /// Subscribes to `source` and starts following it. Must be called from
    /// within a tokio runtime.
    pub fn spawn(
        source: &dyn TemperatureSource,
        target: Temperature,
        config: &ThermostatConfig,
        notify: Dispatcher<bool>,
    ) -> Result<Self, SourceError> {
        let mut readings = source.subscribe()?;
        let source_id = source.id().to_string();

        let mut engine = ThermostatEngine::new(
            target,
            config.threshold,
            source.read().map(|reading| reading.temperature),
        );
        // Announced even when unchanged so a replaced loop's last word is
        // overwritten.
        engine.evaluate();
        notify.send(engine.is_active());
        info!(source = %source_id, %target, active = engine.is_active(), "thermostat started");

        let engine = Arc::new(Mutex::new(engine));
        let task = {
            let engine = engine.clone();
            let notify = notify.clone();
            let source_id = source_id.clone();
            tokio::spawn(async move {
                loop {
                    match readings.recv().await {
                        Ok(current) => {
                            let changed = {
                                let mut engine = lock(&engine);
                                engine.update_reading(current).then(|| engine.is_active())
                            };
                            debug!(source = %source_id, %current, "temperature reading");
                            if let Some(active) = changed {
                                info!(source = %source_id, %current, active, "thermostat demand changed");
                                notify.send(active);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(source = %source_id, skipped, "thermostat fell behind on readings");
                        }
                        Err(RecvError::Closed) => {
                            info!(source = %source_id, "temperature source closed");
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            source_id,
            engine,
            notify,
            task,
        })
    }

    pub fn set(&self, target: Temperature) {
        let changed = {
            let mut engine = lock(&self.engine);
            engine.set_target(target).then(|| engine.is_active())
        };
        self.retargeted(target, changed);
    }

    /// Applies a scheduled retarget; returns the new target when it moved.
    /// The comparison and the update happen under one lock.
    pub fn adjust(&self, action: ThermostatAction) -> Option<Temperature> {
        let (target, changed) = {
            let mut engine = lock(&self.engine);
            let target = action.resolve(engine.target())?;
            (target, engine.set_target(target).then(|| engine.is_active()))
        };
        self.retargeted(target, changed);
        Some(target)
    }

    fn retargeted(&self, target: Temperature, changed: Option<bool>) {
        info!(source = %self.source_id, %target, "thermostat target set");
        if let Some(active) = changed {
            self.notify.send(active);
        }
    }

    pub fn target(&self) -> Temperature {
        lock(&self.engine).target()
    }

    pub fn current(&self) -> Option<Temperature> {
        lock(&self.engine).current()
    }

    pub fn active(&self) -> bool {
        lock(&self.engine).is_active()
    }

    pub fn status(&self) -> ThermostatStatus {
        lock(&self.engine).status()
    }

    /// Stops following the source.
    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for ThermostatLoop {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn lock(engine: &Mutex<ThermostatEngine>) -> MutexGuard<'_, ThermostatEngine> {
    engine
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use crate::{clock::SimulatedClock, sensor::BroadcastSource};

    use super::*;

    const TARGET: Temperature = Temperature::from_millis(18_000);
    const THRESHOLD: Temperature = Temperature::from_millis(500);

    fn engine_with(active: bool, current: i32) -> ThermostatEngine {
        let mut engine = ThermostatEngine::new(TARGET, THRESHOLD, None);
        engine.active = active;
        engine.current = Some(Temperature::from_millis(current));
        engine
    }

    #[test]
    fn holds_state_inside_the_band() {
        let mut engine = engine_with(false, 17_950);
        assert!(!engine.evaluate());
        assert!(!engine.is_active());

        let mut engine = engine_with(true, 17_950);
        assert!(!engine.evaluate());
        assert!(engine.is_active());
    }

    #[test]
    fn turns_on_below_threshold() {
        let mut engine = engine_with(false, 17_950);
        assert!(engine.update_reading(Temperature::from_millis(17_499)));
        assert!(engine.is_active());
    }

    #[test]
    fn band_edges_do_not_flip() {
        let mut engine = engine_with(false, 17_500);
        assert!(!engine.evaluate());
        let mut engine = engine_with(true, 18_000);
        assert!(!engine.evaluate());
        assert!(engine.is_active());
    }

    #[test]
    fn turns_off_above_target_from_either_state() {
        for start in [true, false] {
            let mut engine = engine_with(start, 17_000);
            engine.update_reading(Temperature::from_millis(18_050));
            assert!(!engine.is_active());
        }
    }

    #[test]
    fn starts_active_and_settles_on_first_evaluation() {
        let mut warm =
            ThermostatEngine::new(TARGET, THRESHOLD, Some(Temperature::from_millis(21_000)));
        assert!(warm.is_active());
        assert!(warm.evaluate());
        assert!(!warm.is_active());

        let mut unknown = ThermostatEngine::new(TARGET, THRESHOLD, None);
        assert!(!unknown.evaluate());
        assert!(unknown.is_active());
    }

    #[test]
    fn retargeting_reevaluates() {
        let mut engine = engine_with(false, 18_000);
        assert!(engine.set_target(Temperature::from_millis(19_000)));
        assert!(engine.is_active());
        assert!(engine.set_target(Temperature::from_millis(17_000)));
        assert!(!engine.is_active());
    }

    #[tokio::test]
    async fn adjust_moves_the_target_only_in_the_asked_direction() {
        let source = BroadcastSource::new("hall", Arc::new(SimulatedClock::at(12, 0, 0)));
        source.push(Temperature::from_millis(17_000));
        let notify = Dispatcher::spawn("test", |_: bool| {});
        let thermostat =
            ThermostatLoop::spawn(&source, TARGET, &ThermostatConfig::default(), notify).unwrap();

        let lower = Temperature::from_millis(16_000);
        assert_eq!(thermostat.adjust(ThermostatAction::IncreaseTarget(lower)), None);
        assert_eq!(thermostat.target(), TARGET);
        assert!(thermostat.active());

        assert_eq!(
            thermostat.adjust(ThermostatAction::DecreaseTarget(lower)),
            Some(lower)
        );
        assert_eq!(thermostat.target(), lower);
        assert!(!thermostat.active());

        assert_eq!(thermostat.adjust(ThermostatAction::DecreaseTarget(TARGET)), None);
        assert_eq!(
            thermostat.adjust(ThermostatAction::SetTarget(TARGET)),
            Some(TARGET)
        );
        assert!(thermostat.active());
    }
}
