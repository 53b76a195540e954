//! Daily schedule entries and the actions they carry.

use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::{error::ScheduleError, temperature::Temperature};

/// Thermostat retargeting bundled with a schedule entry (e.g. a night setback).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "temperature", rename_all = "snake_case")]
pub enum ThermostatAction {
    SetTarget(Temperature),
    /// Raises the target, never lowers it.
    IncreaseTarget(Temperature),
    /// Lowers the target, never raises it.
    DecreaseTarget(Temperature),
}

impl ThermostatAction {
    /// The new target this action yields against `current`, if any.
    pub fn resolve(self, current: Temperature) -> Option<Temperature> {
        match self {
            Self::SetTarget(target) => Some(target),
            Self::IncreaseTarget(target) if target > current => Some(target),
            Self::DecreaseTarget(target) if target < current => Some(target),
            Self::IncreaseTarget(_) | Self::DecreaseTarget(_) => None,
        }
    }
}

impl fmt::Display for ThermostatAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetTarget(t) => write!(f, "set target {t}"),
            Self::IncreaseTarget(t) => write!(f, "increase target to {t}"),
            Self::DecreaseTarget(t) => write!(f, "decrease target to {t}"),
        }
    }
}

/// What a schedule entry does when it fires: switch the schedule demand,
/// optionally retargeting the thermostat at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    TurnOn(Option<ThermostatAction>),
    TurnOff(Option<ThermostatAction>),
}

impl Action {
    pub const fn on() -> Self {
        Self::TurnOn(None)
    }

    pub const fn off() -> Self {
        Self::TurnOff(None)
    }

    pub const fn from_demand(demand: bool) -> Self {
        if demand {
            Self::TurnOn(None)
        } else {
            Self::TurnOff(None)
        }
    }

    pub const fn demand(self) -> bool {
        matches!(self, Self::TurnOn(_))
    }

    pub const fn thermostat(self) -> Option<ThermostatAction> {
        match self {
            Self::TurnOn(thermostat) | Self::TurnOff(thermostat) => thermostat,
        }
    }

    #[must_use]
    pub const fn with_thermostat(self, thermostat: ThermostatAction) -> Self {
        match self {
            Self::TurnOn(_) => Self::TurnOn(Some(thermostat)),
            Self::TurnOff(_) => Self::TurnOff(Some(thermostat)),
        }
    }

    /// Same thermostat payload, demand forced on.
    #[must_use]
    pub const fn forced_on(self) -> Self {
        Self::TurnOn(self.thermostat())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let switch = if self.demand() { "on" } else { "off" };
        match self.thermostat() {
            Some(thermostat) => write!(f, "{switch} ({thermostat})"),
            None => f.write_str(switch),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum Switch {
    On,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventRecord {
    hour: u32,
    minute: u32,
    action: Switch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thermostat_action: Option<ThermostatAction>,
}

/// A daily recurring entry. Only constructible through [`Event::new`], so every
/// value in circulation has a valid time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "EventRecord", into = "EventRecord")]
pub struct Event {
    hour: u32,
    minute: u32,
    action: Action,
}

impl Event {
    pub fn new(hour: u32, minute: u32, action: Action) -> Result<Self, ScheduleError> {
        if hour >= 24 || minute >= 60 {
            return Err(ScheduleError::InvalidEvent { hour, minute });
        }
        Ok(Self {
            hour,
            minute,
            action,
        })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn action(&self) -> Action {
        self.action
    }

    /// Minutes since midnight; the ordering key of a schedule.
    pub fn minute_of_day(&self) -> u32 {
        self.hour * 60 + self.minute
    }

    pub fn time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02} {}", self.hour, self.minute, self.action)
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = ScheduleError;

    fn try_from(record: EventRecord) -> Result<Self, Self::Error> {
        let action = match record.action {
            Switch::On => Action::TurnOn(record.thermostat_action),
            Switch::Off => Action::TurnOff(record.thermostat_action),
        };
        Self::new(record.hour, record.minute, action)
    }
}

impl From<Event> for EventRecord {
    fn from(event: Event) -> Self {
        Self {
            hour: event.hour,
            minute: event.minute,
            action: if event.action.demand() {
                Switch::On
            } else {
                Switch::Off
            },
            thermostat_action: event.action.thermostat(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_times() {
        assert!(Event::new(23, 59, Action::on()).is_ok());
        assert!(Event::new(0, 0, Action::off()).is_ok());
        assert_eq!(
            Event::new(24, 0, Action::on()),
            Err(ScheduleError::InvalidEvent { hour: 24, minute: 0 })
        );
        assert_eq!(
            Event::new(12, 60, Action::on()),
            Err(ScheduleError::InvalidEvent {
                hour: 12,
                minute: 60
            })
        );
    }

    #[test]
    fn increase_and_decrease_only_move_one_way() {
        let current = Temperature::from_millis(18_000);
        let higher = Temperature::from_millis(19_000);
        let lower = Temperature::from_millis(16_000);

        assert_eq!(ThermostatAction::IncreaseTarget(higher).resolve(current), Some(higher));
        assert_eq!(ThermostatAction::IncreaseTarget(lower).resolve(current), None);
        assert_eq!(ThermostatAction::DecreaseTarget(lower).resolve(current), Some(lower));
        assert_eq!(ThermostatAction::DecreaseTarget(higher).resolve(current), None);
        assert_eq!(ThermostatAction::SetTarget(lower).resolve(current), Some(lower));
    }

    #[test]
    fn json_shape_carries_optional_thermostat_action() {
        let event = Event::new(
            22,
            0,
            Action::off().with_thermostat(ThermostatAction::DecreaseTarget(
                Temperature::from_millis(16_000),
            )),
        )
        .unwrap();

        let json = serde_json::to_value(event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "hour": 22,
                "minute": 0,
                "action": "off",
                "thermostat_action": {"kind": "decrease_target", "temperature": 16000}
            })
        );

        let plain: Event =
            serde_json::from_value(serde_json::json!({"hour": 6, "minute": 30, "action": "on"}))
                .unwrap();
        assert_eq!(plain, Event::new(6, 30, Action::on()).unwrap());
    }

    #[test]
    fn deserializing_invalid_time_fails() {
        let result = serde_json::from_value::<Event>(
            serde_json::json!({"hour": 25, "minute": 0, "action": "on"}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn forced_on_keeps_thermostat_payload() {
        let setback = ThermostatAction::SetTarget(Temperature::from_millis(16_000));
        let action = Action::off().with_thermostat(setback).forced_on();
        assert!(action.demand());
        assert_eq!(action.thermostat(), Some(setback));
    }
}
