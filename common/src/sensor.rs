//! Temperature source port and a broadcast-backed implementation.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::{clock::Clock, error::SourceError, temperature::Temperature};

const SUBSCRIPTION_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reading {
    pub temperature: Temperature,
    pub at: NaiveDateTime,
}

/// Where a thermostat gets its readings from.
pub trait TemperatureSource: Send + Sync {
    fn id(&self) -> &str;

    /// The latest reading, if one has arrived.
    fn read(&self) -> Option<Reading>;

    /// A stream of every reading pushed from now on, in arrival order.
    fn subscribe(&self) -> Result<broadcast::Receiver<Temperature>, SourceError>;
}

struct SourceState {
    latest: Option<Reading>,
    sender: Option<broadcast::Sender<Temperature>>,
}

/// In-process source fed by whoever owns the transport (MQTT bridge, tests).
pub struct BroadcastSource {
    id: String,
    clock: Arc<dyn Clock>,
    state: Mutex<SourceState>,
}

impl BroadcastSource {
    pub fn new(id: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            id: id.into(),
            clock,
            state: Mutex::new(SourceState {
                latest: None,
                sender: Some(sender),
            }),
        }
    }

    /// Records a reading and fans it out. Ignored once the source is closed.
    pub fn push(&self, temperature: Temperature) {
        let mut state = self.lock_state();
        let Some(sender) = state.sender.clone() else {
            return;
        };
        state.latest = Some(Reading {
            temperature,
            at: self.clock.now(),
        });
        // No subscribers is fine; the reading is still kept as the latest.
        let _ = sender.send(temperature);
    }

    /// Ends every subscription; later `subscribe` calls fail.
    pub fn close(&self) {
        self.lock_state().sender = None;
    }

    fn lock_state(&self) -> MutexGuard<'_, SourceState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl TemperatureSource for BroadcastSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn read(&self) -> Option<Reading> {
        self.lock_state().latest
    }

    fn subscribe(&self) -> Result<broadcast::Receiver<Temperature>, SourceError> {
        self.lock_state()
            .sender
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| SourceError::Closed(self.id.clone()))
    }
}
