//! Trigger evaluation: which alarms are due at a given instant.
//!
//! Pure function of (time, alarm set, already-fired set). It is re-run on
//! every tick of the clock, so the already-fired set is what keeps an alarm
//! from firing once per tick for the whole matching minute.

use std::collections::HashSet;

use chrono::NaiveDateTime;

use crate::domain::{Alarm, AlarmId, AlarmTime};

/// Minute-resolution stamp of an instant, used to key firings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MinuteStamp(i64);

impl MinuteStamp {
    pub fn of(now: NaiveDateTime) -> Self {
        Self(now.and_utc().timestamp().div_euclid(60))
    }
}

/// Due alarm ids, in snapshot order, without duplicates.
///
/// An alarm is due iff it is enabled, its time equals `now` floored to the
/// minute, today is one of its days, and it has not already fired this minute.
pub fn evaluate(now: NaiveDateTime, alarms: &[Alarm], already_fired: &HashSet<AlarmId>) -> Vec<AlarmId> {
    let current = AlarmTime::of(now);
    let mut due: Vec<AlarmId> = Vec::new();
    for alarm in alarms {
        if alarm.enabled
            && alarm.time == current
            && alarm.runs_on(now)
            && !already_fired.contains(&alarm.id)
            && !due.contains(&alarm.id)
        {
            due.push(alarm.id);
        }
    }
    due
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{Day, Difficulty, SoundRef};

    /// 2024-01-01 is a Monday.
    pub(crate) fn monday(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(h, m, s).unwrap()
    }

    pub(crate) fn alarm(id: AlarmId, time: &str, days: &[Day]) -> Alarm {
        Alarm {
            id,
            time: time.parse().unwrap(),
            days: days.iter().copied().collect::<BTreeSet<_>>(),
            enabled: true,
            difficulty: Difficulty::Easy,
            sound: SoundRef::Builtin("classic".into()),
            volume: 80,
            auto_delete: false,
            vibration: false,
            label: None,
        }
    }

    #[test]
    fn fires_on_matching_minute_and_day() {
        let alarms = vec![alarm(1, "07:00", &[Day::Mon])];
        let none = HashSet::new();
        assert_eq!(evaluate(monday(7, 0, 0), &alarms, &none), vec![1]);
        assert_eq!(evaluate(monday(7, 0, 59), &alarms, &none), vec![1]);
        assert!(evaluate(monday(7, 1, 0), &alarms, &none).is_empty());
        assert!(evaluate(monday(6, 59, 59), &alarms, &none).is_empty());
    }

    #[test]
    fn gating_by_enabled_days_and_already_fired() {
        let mut disabled = alarm(1, "07:00", &[Day::Mon]);
        disabled.enabled = false;
        let sunday_only = alarm(2, "07:00", &[Day::Sun]);
        let no_days = alarm(3, "07:00", &[]);
        let fired = alarm(4, "07:00", &[Day::Mon]);
        let alarms = vec![disabled, sunday_only, no_days, fired];

        let already: HashSet<AlarmId> = [4].into_iter().collect();
        assert!(evaluate(monday(7, 0, 0), &alarms, &already).is_empty());
    }

    #[test]
    fn same_time_alarms_fire_independently_in_order() {
        let alarms = vec![
            alarm(9, "07:00", &[Day::Mon]),
            alarm(3, "07:00", &[Day::Mon, Day::Tue]),
            alarm(9, "07:00", &[Day::Mon]),
        ];
        assert_eq!(evaluate(monday(7, 0, 30), &alarms, &HashSet::new()), vec![9, 3]);
    }

    #[test]
    fn minute_stamp_floors_to_minute() {
        assert_eq!(MinuteStamp::of(monday(7, 0, 0)), MinuteStamp::of(monday(7, 0, 59)));
        assert_ne!(MinuteStamp::of(monday(7, 0, 59)), MinuteStamp::of(monday(7, 1, 0)));
    }
}
