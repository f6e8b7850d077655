//! Loading the service configuration from TOML.
//!
//! Every field has a default, so an absent or partial file is fine. Example:
//!
//! ```toml
//! tick_interval_ms = 1000
//! required_solves = 3
//! vibration_pattern = [500, 250, 500]
//! notification_template = "Alarm {time}: {label}"
//!
//! [sounds]
//! default = "classic"
//! builtin = ["classic", "digital", "gentle"]
//!
//! # seeds the in-memory store when ALARM_STORE_URL is not set
//! [[alarms]]
//! id = 1
//! time = "07:00"
//! days = ["mon", "tue", "wed", "thu", "fri"]
//! difficulty = "medium"
//! ```

use std::time::Duration;

use serde::Deserialize;
use tracing::{info, error, warn};

use crate::challenge::REQUIRED_SOLVES;
use crate::domain::AlarmRecord;
use crate::sounds::SoundCatalog;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  pub tick_interval_ms: u64,
  pub worker_start_timeout_ms: u64,
  pub required_solves: u32,
  pub vibration_pattern: Vec<u32>,
  /// `{time}` and `{label}` are substituted.
  pub notification_template: String,
  pub sounds: SoundCatalog,
  pub alarms: Vec<AlarmRecord>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      tick_interval_ms: 1000,
      worker_start_timeout_ms: 2000,
      required_solves: REQUIRED_SOLVES,
      vibration_pattern: vec![500, 250, 500],
      notification_template: "Alarm {time}: {label}".into(),
      sounds: SoundCatalog::default(),
      alarms: Vec::new(),
    }
  }
}

impl AppConfig {
  pub fn tick_interval(&self) -> Duration {
    Duration::from_millis(self.tick_interval_ms.max(10))
  }

  pub fn worker_start_timeout(&self) -> Duration {
    Duration::from_millis(self.worker_start_timeout_ms.max(1))
  }

  fn sanitized(mut self) -> Self {
    if self.required_solves == 0 {
      warn!(target: "mathalarm_backend", "required_solves = 0 is not allowed; using 1");
      self.required_solves = 1;
    }
    self
  }
}

/// Load `AppConfig` from ALARM_CONFIG_PATH. Missing variable -> defaults.
/// On any parsing/IO error, logs and falls back to defaults.
pub fn load_app_config_from_env() -> AppConfig {
  let Ok(path) = std::env::var("ALARM_CONFIG_PATH") else {
    return AppConfig::default();
  };
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<AppConfig>(&s) {
      Ok(cfg) => {
        info!(target: "mathalarm_backend", %path, seeded_alarms = cfg.alarms.len(), "Loaded config (TOML)");
        cfg.sanitized()
      }
      Err(e) => {
        error!(target: "mathalarm_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
        AppConfig::default()
      }
    },
    Err(e) => {
      error!(target: "mathalarm_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
      AppConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partial_toml_keeps_defaults() {
    let cfg: AppConfig = toml::from_str(
      r#"
        tick_interval_ms = 250

        [sounds]
        default = "beep"

        [[alarms]]
        id = 4
        time = "06:30"
        days = ["sat"]
        difficulty = "hard"
        autoDelete = true
      "#,
    )
    .unwrap();
    assert_eq!(cfg.tick_interval(), Duration::from_millis(250));
    assert_eq!(cfg.required_solves, 3);
    assert_eq!(cfg.sounds.default, "beep");
    assert!(!cfg.sounds.builtin.is_empty());
    assert_eq!(cfg.alarms.len(), 1);
    assert!(cfg.alarms[0].spec.auto_delete);
  }

  #[test]
  fn zero_required_solves_is_raised() {
    let cfg = AppConfig { required_solves: 0, ..AppConfig::default() }.sanitized();
    assert_eq!(cfg.required_solves, 1);
  }
}
