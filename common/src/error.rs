use thiserror::Error;

/// Rejection of an event before it reaches a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid event time {hour:02}:{minute:02} (hour must be < 24, minute < 60)")]
    InvalidEvent { hour: u32, minute: u32 },
}

/// An actuator refused or failed a command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("output {output} failed: {reason}")]
pub struct OutputError {
    pub output: String,
    pub reason: String,
}

impl OutputError {
    pub fn new(output: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            reason: reason.into(),
        }
    }
}

/// A temperature source could not hand out a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("temperature source {0} is closed")]
    Closed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZoneError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error("thermostat setup failed for zone {zone}")]
    Subscription {
        zone: String,
        #[source]
        source: SourceError,
    },
}
