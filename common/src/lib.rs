pub mod clock;
pub mod combiner;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod event_handler;
pub mod output;
pub mod schedule;
pub mod scheduler;
pub mod sensor;
pub mod temperature;
pub mod thermostat;
pub mod topics;
pub mod zone;

pub use clock::{Clock, LocalClock, SimulatedClock};
pub use combiner::{DemandCombiner, Demands};
pub use config::{NetworkConfig, RuntimeConfig, ThermostatConfig, ZoneConfig};
pub use dispatch::Dispatcher;
pub use error::{OutputError, ScheduleError, SourceError, ZoneError};
pub use event::{Action, Event, ThermostatAction};
pub use event_handler::EventHandler;
pub use output::{Output, VirtualOutput};
pub use schedule::{Firing, Schedule};
pub use scheduler::Scheduler;
pub use sensor::{BroadcastSource, Reading, TemperatureSource};
pub use temperature::{ParseTemperatureError, Temperature};
pub use thermostat::{ThermostatEngine, ThermostatLoop, ThermostatStatus};
pub use topics::*;
pub use zone::{Zone, ZoneStatus};
