//! Built-in ringtone catalog and resolution of raw sound keys into `SoundRef`.

use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::domain::SoundRef;

/// Names of the ringtones bundled with the UI, plus the fallback one.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SoundCatalog {
  pub default: String,
  pub builtin: Vec<String>,
}

impl Default for SoundCatalog {
  fn default() -> Self {
    Self {
      default: "classic".into(),
      builtin: ["classic", "digital", "gentle", "rooster", "beep"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
  }
}

impl SoundCatalog {
  /// Known builtin name -> `Builtin`; http(s) URL or server path -> `Custom`;
  /// anything else -> the default builtin.
  pub fn resolve(&self, raw: &str) -> SoundRef {
    let key = raw.trim();
    if self.builtin.iter().any(|b| b == key) {
      return SoundRef::Builtin(key.to_string());
    }
    if key.starts_with('/') && key.len() > 1 {
      return SoundRef::Custom(key.to_string());
    }
    if let Ok(url) = Url::parse(key) {
      if matches!(url.scheme(), "http" | "https") {
        return SoundRef::Custom(url.to_string());
      }
    }
    if !key.is_empty() {
      warn!(target: "alarm", sound = %key, fallback = %self.default, "Unknown sound key; using default ringtone");
    }
    SoundRef::Builtin(self.default.clone())
  }
}
