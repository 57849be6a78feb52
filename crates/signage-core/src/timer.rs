//! # On/Off Timer Definitions
//!
//! Weekly display power schedules as stored in the device config and
//! mirrored in the cloud shadow under `onOffTimers`.
//!
//! ## Timer Identity
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         timerUUID layout                                │
//! │                                                                         │
//! │   days (Sun→Sat, included only)   onTime HHMMSS   offTime HHMMSS       │
//! │   ─────────────────────────────   ─────────────   ──────────────       │
//! │   mo we fr                        083000          184500               │
//! │                                                                         │
//! │   => "mowefr083000184500"                                               │
//! │                                                                         │
//! │  Identical schedules always collide on the same id, so re-creating a   │
//! │  timer list is idempotent.                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeSet;

use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

// =============================================================================
// Day Of Week
// =============================================================================

/// Day of the week in canonical Sunday-first order.
///
/// The derived `Ord` follows declaration order, so a `BTreeSet<DayOfWeek>`
/// iterates Sunday → Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DayOfWeek {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl DayOfWeek {
    /// All days, Sunday first.
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Sunday,
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
        DayOfWeek::Saturday,
    ];

    /// Two-letter code used in timer ids.
    pub const fn code(&self) -> &'static str {
        match self {
            DayOfWeek::Sunday => "su",
            DayOfWeek::Monday => "mo",
            DayOfWeek::Tuesday => "tu",
            DayOfWeek::Wednesday => "we",
            DayOfWeek::Thursday => "th",
            DayOfWeek::Friday => "fr",
            DayOfWeek::Saturday => "sa",
        }
    }

    /// Converts to chrono's weekday.
    pub const fn to_weekday(self) -> Weekday {
        match self {
            DayOfWeek::Sunday => Weekday::Sun,
            DayOfWeek::Monday => Weekday::Mon,
            DayOfWeek::Tuesday => Weekday::Tue,
            DayOfWeek::Wednesday => Weekday::Wed,
            DayOfWeek::Thursday => Weekday::Thu,
            DayOfWeek::Friday => Weekday::Fri,
            DayOfWeek::Saturday => Weekday::Sat,
        }
    }
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Sun => DayOfWeek::Sunday,
            Weekday::Mon => DayOfWeek::Monday,
            Weekday::Tue => DayOfWeek::Tuesday,
            Weekday::Wed => DayOfWeek::Wednesday,
            Weekday::Thu => DayOfWeek::Thursday,
            Weekday::Fri => DayOfWeek::Friday,
            Weekday::Sat => DayOfWeek::Saturday,
        }
    }
}

// =============================================================================
// Timer Setting
// =============================================================================

/// One weekly on/off schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnOffTimerSetting {
    /// Days the schedule applies to.
    pub days: BTreeSet<DayOfWeek>,

    /// Local time the display is powered on (`HH:MM:SS`).
    pub on_time: NaiveTime,

    /// Local time the display is powered off (`HH:MM:SS`).
    pub off_time: NaiveTime,

    /// Derived identity, see [`timer_uuid`].
    #[serde(rename = "timerUUID", default)]
    pub timer_uuid: String,
}

impl OnOffTimerSetting {
    /// Creates a timer and derives its id.
    pub fn new(
        days: impl IntoIterator<Item = DayOfWeek>,
        on_time: NaiveTime,
        off_time: NaiveTime,
    ) -> Self {
        let days: BTreeSet<DayOfWeek> = days.into_iter().collect();
        let timer_uuid = timer_uuid(&days, on_time, off_time);
        OnOffTimerSetting {
            days,
            on_time,
            off_time,
            timer_uuid,
        }
    }

    /// Recomputes `timer_uuid` from the schedule.
    ///
    /// Timers arriving from the cloud may carry a stale or empty id.
    pub fn normalized(mut self) -> Self {
        self.timer_uuid = timer_uuid(&self.days, self.on_time, self.off_time);
        self
    }

    /// True when the off event falls on the day after the on event.
    pub fn is_overnight(&self) -> bool {
        self.off_time <= self.on_time
    }

    /// Checks the schedule is usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.days.is_empty() {
            return Err(ValidationError::Empty {
                field: "days".to_string(),
            });
        }
        if self.on_time == self.off_time {
            return Err(ValidationError::InvalidFormat {
                field: "offTime".to_string(),
                reason: "must differ from onTime".to_string(),
            });
        }
        Ok(())
    }
}

/// Builds the timer id: day codes (Sun→Sat) + onTime `HHMMSS` + offTime `HHMMSS`.
pub fn timer_uuid(days: &BTreeSet<DayOfWeek>, on_time: NaiveTime, off_time: NaiveTime) -> String {
    let mut id: String = days.iter().map(DayOfWeek::code).collect();
    id.push_str(&on_time.format("%H%M%S").to_string());
    id.push_str(&off_time.format("%H%M%S").to_string());
    id
}

/// Normalizes a timer list: recomputes ids and drops duplicate schedules.
pub fn dedupe_timers(timers: impl IntoIterator<Item = OnOffTimerSetting>) -> Vec<OnOffTimerSetting> {
    let mut seen = BTreeSet::new();
    timers
        .into_iter()
        .map(OnOffTimerSetting::normalized)
        .filter(|t| seen.insert(t.timer_uuid.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_uuid_for_weekday_subset() {
        let timer = OnOffTimerSetting::new(
            [DayOfWeek::Monday, DayOfWeek::Wednesday, DayOfWeek::Friday],
            t(8, 30, 0),
            t(18, 45, 0),
        );
        assert_eq!(timer.timer_uuid, "mowefr083000184500");
    }

    #[test]
    fn test_uuid_for_all_days() {
        let timer = OnOffTimerSetting::new(DayOfWeek::ALL, t(9, 15, 0), t(22, 50, 0));
        assert_eq!(timer.timer_uuid, "sumotuwethfrsa091500225000");
    }

    #[test]
    fn test_uuid_ignores_input_order() {
        let a = OnOffTimerSetting::new(
            [DayOfWeek::Saturday, DayOfWeek::Sunday],
            t(7, 0, 0),
            t(19, 0, 0),
        );
        let b = OnOffTimerSetting::new(
            [DayOfWeek::Sunday, DayOfWeek::Saturday, DayOfWeek::Sunday],
            t(7, 0, 0),
            t(19, 0, 0),
        );
        assert_eq!(a.timer_uuid, "susa070000190000");
        assert_eq!(a.timer_uuid, b.timer_uuid);
    }

    #[test]
    fn test_deserialize_recomputes_id() {
        let json = r#"{"days":["FRIDAY","MONDAY","WEDNESDAY"],"onTime":"08:30:00","offTime":"18:45:00"}"#;
        let timer: OnOffTimerSetting = serde_json::from_str(json).unwrap();
        assert!(timer.timer_uuid.is_empty());
        assert_eq!(timer.normalized().timer_uuid, "mowefr083000184500");
    }

    #[test]
    fn test_dedupe_collapses_identical_schedules() {
        let one = OnOffTimerSetting::new([DayOfWeek::Monday], t(8, 0, 0), t(17, 0, 0));
        let timers = dedupe_timers(vec![one.clone(), one.clone()]);
        assert_eq!(timers.len(), 1);
    }

    #[test]
    fn test_validate() {
        let empty = OnOffTimerSetting::new([], t(8, 0, 0), t(17, 0, 0));
        assert!(empty.validate().is_err());

        let same = OnOffTimerSetting::new([DayOfWeek::Monday], t(8, 0, 0), t(8, 0, 0));
        assert!(same.validate().is_err());

        let overnight = OnOffTimerSetting::new([DayOfWeek::Monday], t(22, 0, 0), t(6, 0, 0));
        assert!(overnight.validate().is_ok());
        assert!(overnight.is_overnight());
    }
}
