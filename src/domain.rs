//! Domain models: alarms, their schedule (time of day + weekdays), difficulty and sound.
//!
//! Two shapes exist for an alarm:
//!   - `AlarmRecord` is the wire shape exchanged with the store and the UI (plain strings)
//!   - `Alarm` is the validated shape the engine works with
//! Conversion happens once, at the boundary, via `Alarm::from_record`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Timelike, Weekday, Datelike};
use serde::{Deserialize, Serialize};

use crate::error::AlarmError;
use crate::sounds::SoundCatalog;

/// Identity assigned by the persistence layer.
pub type AlarmId = i64;

/// Weekday tag as used by the UI and the store ("sun".."sat").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Day { Sun, Mon, Tue, Wed, Thu, Fri, Sat }

impl From<Weekday> for Day {
  fn from(w: Weekday) -> Self {
    match w {
      Weekday::Sun => Day::Sun,
      Weekday::Mon => Day::Mon,
      Weekday::Tue => Day::Tue,
      Weekday::Wed => Day::Wed,
      Weekday::Thu => Day::Thu,
      Weekday::Fri => Day::Fri,
      Weekday::Sat => Day::Sat,
    }
  }
}

impl FromStr for Day {
  type Err = AlarmError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "sun" => Ok(Day::Sun),
      "mon" => Ok(Day::Mon),
      "tue" => Ok(Day::Tue),
      "wed" => Ok(Day::Wed),
      "thu" => Ok(Day::Thu),
      "fri" => Ok(Day::Fri),
      "sat" => Ok(Day::Sat),
      _ => Err(AlarmError::InvalidDay(s.to_string())),
    }
  }
}

/// Wall-clock time of day at minute resolution. Serialized as "HH:MM".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AlarmTime {
  hour: u8,
  minute: u8,
}

impl AlarmTime {
  pub fn new(hour: u8, minute: u8) -> Result<Self, AlarmError> {
    if hour > 23 || minute > 59 {
      return Err(AlarmError::InvalidTime(format!("{}:{}", hour, minute)));
    }
    Ok(Self { hour, minute })
  }

  /// Floor a timestamp to its minute and keep the time-of-day part.
  pub fn of(now: NaiveDateTime) -> Self {
    // chrono guarantees hour < 24 and minute < 60
    Self { hour: now.hour() as u8, minute: now.minute() as u8 }
  }

  #[cfg(test)]
  pub fn hour(&self) -> u8 { self.hour }
  #[cfg(test)]
  pub fn minute(&self) -> u8 { self.minute }
}

impl fmt::Display for AlarmTime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:02}:{:02}", self.hour, self.minute)
  }
}

impl FromStr for AlarmTime {
  type Err = AlarmError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || AlarmError::InvalidTime(s.to_string());
    let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
      return Err(invalid());
    }
    let hour = h.parse::<u8>().map_err(|_| invalid())?;
    let minute = m.parse::<u8>().map_err(|_| invalid())?;
    Self::new(hour, minute).map_err(|_| invalid())
  }
}

impl TryFrom<String> for AlarmTime {
  type Error = AlarmError;
  fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

impl From<AlarmTime> for String {
  fn from(t: AlarmTime) -> Self { t.to_string() }
}

/// Selects the arithmetic generation parameters (see `problem`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty { Easy, Medium, Hard }

impl FromStr for Difficulty {
  type Err = AlarmError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "easy" => Ok(Difficulty::Easy),
      "medium" => Ok(Difficulty::Medium),
      "hard" => Ok(Difficulty::Hard),
      _ => Err(AlarmError::InvalidDifficulty(s.to_string())),
    }
  }
}

/// Where the ringtone comes from. Resolved once by `SoundCatalog::resolve`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoundRef {
  /// One of the sounds bundled with the UI.
  Builtin(String),
  /// An uploaded ringtone, by URL or server-relative path.
  Custom(String),
}

/// Alarm fields as stored/edited (everything except the identity).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSpec {
  pub time: String,
  #[serde(default)] pub days: Vec<String>,
  #[serde(default = "default_enabled")] pub enabled: bool,
  pub difficulty: String,
  #[serde(default)] pub sound: String,
  #[serde(default = "default_volume")] pub volume: u8,
  #[serde(default)] pub auto_delete: bool,
  #[serde(default)] pub vibration: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")] pub label: Option<String>,
}

fn default_enabled() -> bool { true }
fn default_volume() -> u8 { 80 }

/// Wire shape of an alarm (store rows, UI payloads).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
  pub id: AlarmId,
  #[serde(flatten)]
  pub spec: AlarmSpec,
}

/// Partial update sent to the store. Only the fields the engine changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub enabled: Option<bool>,
}

impl AlarmPatch {
  pub fn disable() -> Self { Self { enabled: Some(false) } }
}

/// The schedulable entity, validated.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
  pub id: AlarmId,
  pub time: AlarmTime,
  /// Empty set: the alarm never fires.
  pub days: BTreeSet<Day>,
  pub enabled: bool,
  pub difficulty: Difficulty,
  pub sound: SoundRef,
  /// 0..=100
  pub volume: u8,
  pub auto_delete: bool,
  pub vibration: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

impl Alarm {
  /// Validate a wire record. Bad time/day/difficulty tags reject the record.
  pub fn from_record(rec: AlarmRecord, sounds: &SoundCatalog) -> Result<Self, AlarmError> {
    let spec = rec.spec;
    let time = spec.time.parse::<AlarmTime>()?;
    let difficulty = spec.difficulty.parse::<Difficulty>()?;
    let days = spec
      .days
      .iter()
      .map(|d| d.parse::<Day>())
      .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(Self {
      id: rec.id,
      time,
      days,
      enabled: spec.enabled,
      difficulty,
      sound: sounds.resolve(&spec.sound),
      volume: spec.volume.min(100),
      auto_delete: spec.auto_delete,
      vibration: spec.vibration,
      label: spec.label.filter(|l| !l.trim().is_empty()),
    })
  }

  /// True if this alarm is scheduled for the weekday of `now`.
  pub fn runs_on(&self, now: NaiveDateTime) -> bool {
    self.days.contains(&Day::from(now.weekday()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(time: &str, days: &[&str], difficulty: &str) -> AlarmRecord {
    AlarmRecord {
      id: 7,
      spec: AlarmSpec {
        time: time.into(),
        days: days.iter().map(|d| d.to_string()).collect(),
        enabled: true,
        difficulty: difficulty.into(),
        sound: "classic".into(),
        volume: 140,
        auto_delete: false,
        vibration: true,
        label: Some("  ".into()),
      },
    }
  }

  #[test]
  fn alarm_time_parses_and_renders() {
    let t: AlarmTime = "7:05".parse().unwrap();
    assert_eq!((t.hour(), t.minute()), (7, 5));
    assert_eq!(t.to_string(), "07:05");
    assert_eq!("23:59".parse::<AlarmTime>().unwrap().to_string(), "23:59");
  }

  #[test]
  fn alarm_time_rejects_out_of_range() {
    for bad in ["24:00", "12:60", "1200", "12:5", "ab:cd", ""] {
      assert!(matches!(bad.parse::<AlarmTime>(), Err(AlarmError::InvalidTime(_))), "{bad}");
    }
  }

  #[test]
  fn record_converts_into_alarm() {
    let alarm = Alarm::from_record(record("07:00", &["mon", "FRI", "mon"], "Hard"), &SoundCatalog::default()).unwrap();
    assert_eq!(alarm.time.to_string(), "07:00");
    assert_eq!(alarm.days.iter().copied().collect::<Vec<_>>(), vec![Day::Mon, Day::Fri]);
    assert_eq!(alarm.difficulty, Difficulty::Hard);
    assert_eq!(alarm.sound, SoundRef::Builtin("classic".into()));
    assert_eq!(alarm.volume, 100);
    assert_eq!(alarm.label, None);
  }

  #[test]
  fn record_with_bad_tags_is_rejected() {
    let catalog = SoundCatalog::default();
    assert!(matches!(
      Alarm::from_record(record("07:00", &["mon"], "extreme"), &catalog),
      Err(AlarmError::InvalidDifficulty(d)) if d == "extreme"
    ));
    assert!(matches!(
      Alarm::from_record(record("07:00", &["funday"], "easy"), &catalog),
      Err(AlarmError::InvalidDay(_))
    ));
  }

  #[test]
  fn record_json_uses_camel_case() {
    let json = r#"{"id":1,"time":"07:00","days":["mon"],"difficulty":"easy","autoDelete":true}"#;
    let rec: AlarmRecord = serde_json::from_str(json).unwrap();
    assert_eq!(rec.id, 1);
    assert!(rec.spec.auto_delete);
    assert!(rec.spec.enabled);
    assert_eq!(rec.spec.volume, 80);
  }

  #[test]
  fn weekday_maps_to_day_tag() {
    let monday = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(7, 0, 0).unwrap();
    assert_eq!(Day::from(monday.weekday()), Day::Mon);
  }
}
