//! Actuator port and an in-memory implementation.

use std::sync::{Mutex, MutexGuard};

use tracing::info;

use crate::error::OutputError;

/// A physical (or simulated) heating output.
pub trait Output: Send + Sync {
    fn id(&self) -> &str;
    fn activate(&self) -> Result<(), OutputError>;
    fn deactivate(&self) -> Result<(), OutputError>;
    fn active(&self) -> Result<bool, OutputError>;
}

#[derive(Debug, Default)]
struct VirtualState {
    active: bool,
    activations: u32,
    deactivations: u32,
    failing: bool,
}

/// Simulated output that keeps its state in memory.
#[derive(Debug)]
pub struct VirtualOutput {
    id: String,
    state: Mutex<VirtualState>,
}

impl VirtualOutput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(VirtualState::default()),
        }
    }

    /// Makes every subsequent command fail (the state is left untouched).
    pub fn set_failing(&self, failing: bool) {
        self.lock_state().failing = failing;
    }

    pub fn activations(&self) -> u32 {
        self.lock_state().activations
    }

    pub fn deactivations(&self) -> u32 {
        self.lock_state().deactivations
    }

    pub fn is_on(&self) -> bool {
        self.lock_state().active
    }

    fn switch(&self, on: bool) -> Result<(), OutputError> {
        let mut state = self.lock_state();
        if on {
            state.activations += 1;
        } else {
            state.deactivations += 1;
        }
        if state.failing {
            return Err(OutputError::new(&self.id, "simulated failure"));
        }
        state.active = on;
        info!(output = %self.id, on, "virtual output switched");
        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, VirtualState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Output for VirtualOutput {
    fn id(&self) -> &str {
        &self.id
    }

    fn activate(&self) -> Result<(), OutputError> {
        self.switch(true)
    }

    fn deactivate(&self) -> Result<(), OutputError> {
        self.switch(false)
    }

    fn active(&self) -> Result<bool, OutputError> {
        let state = self.lock_state();
        if state.failing {
            return Err(OutputError::new(&self.id, "simulated failure"));
        }
        Ok(state.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_commands_and_tracks_state() {
        let output = VirtualOutput::new("boiler");
        output.activate().unwrap();
        assert_eq!(output.active(), Ok(true));
        output.deactivate().unwrap();
        assert_eq!(output.active(), Ok(false));
        assert_eq!((output.activations(), output.deactivations()), (1, 1));
    }

    #[test]
    fn failing_output_reports_errors_and_keeps_state() {
        let output = VirtualOutput::new("boiler");
        output.set_failing(true);
        let err = output.activate().unwrap_err();
        assert_eq!(err.output, "boiler");
        assert!(!output.is_on());
        assert!(output.active().is_err());
    }
}
