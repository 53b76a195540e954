use chrono::{NaiveDateTime, TimeDelta, Timelike};

use crate::event::Event;

/// Ordered daily events for one zone. Sorted by time of day; entries sharing a
/// time keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    events: Vec<Event>,
}

/// Everything due at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Firing {
    pub at: NaiveDateTime,
    pub events: Vec<Event>,
}

impl Schedule {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        let mut schedule = Self::default();
        for event in events {
            schedule.insert(event);
        }
        schedule
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn insert(&mut self, event: Event) {
        let key = event.minute_of_day();
        let index = self
            .events
            .partition_point(|existing| existing.minute_of_day() <= key);
        self.events.insert(index, event);
    }

    /// Drops every entry equal to `event`; returns how many went.
    pub fn remove(&mut self, event: &Event) -> usize {
        let before = self.events.len();
        self.events.retain(|existing| existing != event);
        before - self.events.len()
    }

    /// The event whose action should be in force at `at`: the latest one at or
    /// before that time of day, else the last one of the list (fired yesterday).
    pub fn current_event(&self, at: NaiveDateTime) -> Option<&Event> {
        let now_minutes = at.hour() * 60 + at.minute();
        self.events
            .iter()
            .rev()
            .find(|event| event.minute_of_day() <= now_minutes)
            .or_else(|| self.events.last())
    }

    /// The first instant strictly after `after` at which events are due,
    /// wrapping to the first event of the next day.
    pub fn next_fire(&self, after: NaiveDateTime) -> Option<Firing> {
        let now = after.time();

        let (date, first) = match self.events.iter().find(|event| event.time() > now) {
            Some(event) => (after.date(), event),
            None => (after.date() + TimeDelta::days(1), self.events.first()?),
        };

        let minute = first.minute_of_day();
        let events = self
            .events
            .iter()
            .filter(|event| event.minute_of_day() == minute)
            .copied()
            .collect();

        Some(Firing {
            at: date.and_time(first.time()),
            events,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::event::Action;

    fn fixed_time(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 1, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn event(hour: u32, minute: u32, on: bool) -> Event {
        Event::new(hour, minute, Action::from_demand(on)).unwrap()
    }

    fn workday() -> Schedule {
        Schedule::new([
            event(21, 12, false),
            event(6, 30, true),
            event(17, 33, true),
            event(7, 45, false),
        ])
    }

    #[test]
    fn keeps_events_sorted_with_stable_ties() {
        let mut schedule = workday();
        let later_tie = Event::new(
            7,
            45,
            Action::on().with_thermostat(crate::event::ThermostatAction::SetTarget(
                crate::temperature::Temperature::from_millis(20_000),
            )),
        )
        .unwrap();
        schedule.insert(later_tie);

        let times: Vec<_> = schedule
            .events()
            .iter()
            .map(|e| (e.hour(), e.minute()))
            .collect();
        assert_eq!(times, vec![(6, 30), (7, 45), (7, 45), (17, 33), (21, 12)]);
        assert_eq!(schedule.events()[1], event(7, 45, false));
        assert_eq!(schedule.events()[2], later_tie);
    }

    #[test]
    fn removes_every_equal_entry() {
        let mut schedule = workday();
        schedule.insert(event(6, 30, true));
        assert_eq!(schedule.remove(&event(6, 30, true)), 2);
        assert_eq!(schedule.len(), 3);
        assert_eq!(schedule.remove(&event(6, 30, true)), 0);
        assert_eq!(schedule.remove(&event(7, 45, true)), 0);
    }

    #[test]
    fn wraps_current_event_to_previous_day() {
        let schedule = Schedule::new([event(6, 30, true), event(7, 45, false)]);

        let early = schedule.current_event(fixed_time(5, 4, 45, 0)).unwrap();
        assert_eq!(*early, event(7, 45, false));

        let morning = schedule.current_event(fixed_time(5, 6, 45, 0)).unwrap();
        assert_eq!(*morning, event(6, 30, true));

        let exact = schedule.current_event(fixed_time(5, 7, 45, 0)).unwrap();
        assert_eq!(*exact, event(7, 45, false));
    }

    #[test]
    fn finds_next_fire_and_wraps_to_tomorrow() {
        let schedule = workday();

        let next = schedule.next_fire(fixed_time(5, 20, 4, 23)).unwrap();
        assert_eq!(next.at, fixed_time(5, 21, 12, 0));
        assert_eq!(next.events, vec![event(21, 12, false)]);

        let after = schedule.next_fire(next.at).unwrap();
        assert_eq!(after.at, fixed_time(6, 6, 30, 0));
        assert_eq!(after.events, vec![event(6, 30, true)]);
    }

    #[test]
    fn empty_schedule_has_nothing_to_do() {
        let schedule = Schedule::default();
        assert!(schedule.current_event(fixed_time(5, 12, 0, 0)).is_none());
        assert!(schedule.next_fire(fixed_time(5, 12, 0, 0)).is_none());
    }
}
