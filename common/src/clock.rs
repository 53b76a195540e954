//! Wall-clock capability injected into the scheduler.

use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::time::Instant;

/// Source of local wall-clock time.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

/// The host's local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Wall time that starts at a fixed instant and then advances with tokio's
/// clock. Under `tokio::time::pause` the whole schedule runs in virtual time.
#[derive(Debug, Clone, Copy)]
pub struct SimulatedClock {
    anchor: NaiveDateTime,
    started: Instant,
}

impl SimulatedClock {
    pub fn starting_at(anchor: NaiveDateTime) -> Self {
        Self {
            anchor,
            started: Instant::now(),
        }
    }

    /// Anchors at `hour:minute:second` on an arbitrary fixed day.
    pub fn at(hour: u32, minute: u32, second: u32) -> Self {
        let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap_or_default();
        let time = NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(NaiveTime::MIN);
        Self::starting_at(day.and_time(time))
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> NaiveDateTime {
        TimeDelta::from_std(self.started.elapsed())
            .ok()
            .and_then(|elapsed| self.anchor.checked_add_signed(elapsed))
            .unwrap_or(NaiveDateTime::MAX)
    }
}

/// Tokio's own stand-in for "never", roughly thirty years out.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Converts a wall-clock deadline into a tokio deadline relative to `now`.
/// Waits too long to represent saturate at [`FAR_FUTURE`].
pub(crate) fn deadline(now: NaiveDateTime, at: NaiveDateTime) -> Instant {
    let base = Instant::now();
    let wait = at
        .signed_duration_since(now)
        .to_std()
        .unwrap_or_default()
        .min(FAR_FUTURE);
    base.checked_add(wait).unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn simulated_clock_follows_tokio_time() {
        let clock = SimulatedClock::at(7, 25, 0);
        assert_eq!((clock.now().hour(), clock.now().minute()), (7, 25));

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        assert_eq!((clock.now().hour(), clock.now().minute()), (7, 30));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_saturates_instead_of_overflowing() {
        let now = SimulatedClock::at(7, 0, 0).now();
        let soon = deadline(now, now + TimeDelta::minutes(5));
        assert_eq!(soon - Instant::now(), Duration::from_secs(5 * 60));

        let far = deadline(now, NaiveDateTime::MAX);
        assert_eq!(far - Instant::now(), FAR_FUTURE);

        // A deadline already passed means wake now.
        assert_eq!(deadline(now, now - TimeDelta::hours(1)), Instant::now());
    }
}
