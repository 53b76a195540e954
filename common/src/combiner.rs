//! ANDs schedule and thermostat demand into one output command.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::output::Output;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Demands {
    pub schedule: bool,
    /// `true` while no thermostat is attached, so the zone follows its schedule.
    pub thermostat: bool,
    /// What was last commanded to the output.
    pub current: bool,
}

pub struct DemandCombiner {
    output: Arc<dyn Output>,
    state: Mutex<Demands>,
}

impl DemandCombiner {
    /// Takes over `output`, switching it off unless demand says otherwise.
    pub fn new(output: Arc<dyn Output>) -> Self {
        let current = output.active().unwrap_or_else(|err| {
            warn!("could not read initial output state, assuming off: {err}");
            false
        });
        let combiner = Self {
            output,
            state: Mutex::new(Demands {
                schedule: false,
                thermostat: true,
                current,
            }),
        };
        combiner.reconcile(&mut combiner.lock_state());
        combiner
    }

    pub fn on_schedule_demand(&self, demand: bool) {
        let mut state = self.lock_state();
        state.schedule = demand;
        self.reconcile(&mut state);
    }

    pub fn on_thermostat_demand(&self, demand: bool) {
        let mut state = self.lock_state();
        state.thermostat = demand;
        self.reconcile(&mut state);
    }

    pub fn demands(&self) -> Demands {
        *self.lock_state()
    }

    pub fn demand(&self) -> bool {
        self.lock_state().current
    }

    pub fn output_id(&self) -> &str {
        self.output.id()
    }

    /// Commands the output only on a transition. The recorded demand follows
    /// the target even if the output call fails; the next transition retries.
    fn reconcile(&self, state: &mut Demands) {
        let target = state.schedule && state.thermostat;
        if target == state.current {
            debug!(output = %self.output.id(), demand = target, "demand unchanged");
            return;
        }

        let result = if target {
            self.output.activate()
        } else {
            self.output.deactivate()
        };
        match result {
            Ok(()) => info!(output = %self.output.id(), demand = target, "output switched"),
            Err(err) => warn!(output = %self.output.id(), demand = target, "output command failed: {err}"),
        }
        state.current = target;
    }

    fn lock_state(&self) -> MutexGuard<'_, Demands> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::VirtualOutput;

    fn combiner() -> (Arc<VirtualOutput>, DemandCombiner) {
        let output = Arc::new(VirtualOutput::new("boiler"));
        let combiner = DemandCombiner::new(output.clone());
        (output, combiner)
    }

    #[test]
    fn schedule_alone_drives_an_unthermostatted_zone() {
        let (output, combiner) = combiner();
        combiner.on_schedule_demand(true);
        assert!(output.is_on());
        combiner.on_schedule_demand(false);
        assert!(!output.is_on());
    }

    #[test]
    fn both_signals_must_agree() {
        let (output, combiner) = combiner();
        combiner.on_thermostat_demand(false);
        combiner.on_schedule_demand(true);
        assert!(!output.is_on());
        combiner.on_thermostat_demand(true);
        assert!(output.is_on());
        assert_eq!(
            combiner.demands(),
            Demands {
                schedule: true,
                thermostat: true,
                current: true
            }
        );
    }

    #[test]
    fn unchanged_demand_never_touches_output() {
        let (output, combiner) = combiner();
        combiner.on_schedule_demand(true);
        combiner.on_schedule_demand(true);
        combiner.on_thermostat_demand(true);
        assert_eq!(output.activations(), 1);

        combiner.on_thermostat_demand(false);
        combiner.on_thermostat_demand(false);
        combiner.on_schedule_demand(false);
        assert_eq!(output.deactivations(), 1);
    }

    #[test]
    fn failed_command_still_records_demand() {
        let (output, combiner) = combiner();
        output.set_failing(true);
        combiner.on_schedule_demand(true);
        assert!(combiner.demand());
        assert!(!output.is_on());

        output.set_failing(false);
        combiner.on_schedule_demand(true);
        assert_eq!(output.activations(), 1);

        combiner.on_schedule_demand(false);
        assert_eq!(output.deactivations(), 1);
    }

    #[test]
    fn takes_over_an_output_left_on() {
        let output = Arc::new(VirtualOutput::new("boiler"));
        output.activate().unwrap();
        let combiner = DemandCombiner::new(output.clone());
        assert!(!output.is_on());
        assert!(!combiner.demand());
    }
}
