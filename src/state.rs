//! Application state shared by the HTTP and WebSocket handlers.
//!
//! This module owns:
//!   - the handle to the alarm service actor
//!   - the sound catalog used to validate incoming alarm records
//!   - the store the service reads from (HTTP when ALARM_STORE_URL is set,
//!     otherwise in-memory, seeded from the config's `[[alarms]]`)

use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::service::{self, AlarmServiceHandle, ServiceSettings};
use crate::sounds::SoundCatalog;
use crate::store::{AlarmStore, HttpAlarmStore, MemoryAlarmStore};

#[derive(Clone)]
pub struct AppState {
    pub service: AlarmServiceHandle,
    pub sounds: SoundCatalog,
}

impl AppState {
    /// Build state from config: pick the store and spawn the service (clock not started).
    #[instrument(level = "info", skip_all)]
    pub fn new(cfg: &AppConfig) -> Self {
        let store: Arc<dyn AlarmStore> = match HttpAlarmStore::from_env() {
            Some(http) => {
                info!(target: "mathalarm_backend", base_url = %http.base_url, "Using HTTP alarm store");
                Arc::new(http)
            }
            None => {
                info!(target: "mathalarm_backend", seeded = cfg.alarms.len(), "ALARM_STORE_URL not set; using in-memory alarm store");
                Arc::new(MemoryAlarmStore::new(cfg.alarms.clone()))
            }
        };
        Self::with_store(cfg, store)
    }

    pub fn with_store(cfg: &AppConfig, store: Arc<dyn AlarmStore>) -> Self {
        let settings = ServiceSettings::from(cfg);
        Self {
            service: service::spawn(settings, store),
            sounds: cfg.sounds.clone(),
        }
    }
}
