//! Persistence collaborator: the CRUD service that owns alarm records.
//!
//! The engine never persists anything itself. It reads the list from here and
//! sends fire-and-forget disable/delete requests after a challenge completes.
//!
//! Two implementations:
//!   - `HttpAlarmStore` talks to the REST API (`ALARM_STORE_URL`)
//!   - `MemoryAlarmStore` keeps records in-process (standalone runs, tests)

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use tokio::sync::RwLock;
use tracing::{info, instrument};

use crate::domain::{AlarmId, AlarmPatch, AlarmRecord, AlarmSpec};
use crate::error::StoreError;

#[async_trait]
pub trait AlarmStore: Send + Sync {
  async fn list_alarms(&self) -> Result<Vec<AlarmRecord>, StoreError>;
  async fn create_alarm(&self, spec: AlarmSpec) -> Result<AlarmRecord, StoreError>;
  async fn update_alarm(&self, id: AlarmId, patch: AlarmPatch) -> Result<AlarmRecord, StoreError>;
  async fn delete_alarm(&self, id: AlarmId) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct HttpAlarmStore {
  pub client: reqwest::Client,
  pub base_url: String,
}

impl HttpAlarmStore {
  /// Construct the client if ALARM_STORE_URL is set; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let base_url = std::env::var("ALARM_STORE_URL").ok()?;
    Self::new(&base_url).ok()
  }

  pub fn new(base_url: &str) -> Result<Self, StoreError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(10))
      .build()?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
  }

  fn alarms_url(&self) -> String {
    format!("{}/alarms", self.base_url)
  }

  fn alarm_url(&self, id: AlarmId) -> String {
    format!("{}/alarms/{}", self.base_url, id)
  }

  fn check(resp: reqwest::Response, id: Option<AlarmId>) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
      if let Some(id) = id {
        return Err(StoreError::NotFound(id));
      }
    }
    if !status.is_success() {
      return Err(StoreError::Status { status: status.as_u16(), url: resp.url().to_string() });
    }
    Ok(resp)
  }
}

#[async_trait]
impl AlarmStore for HttpAlarmStore {
  #[instrument(level = "info", skip(self))]
  async fn list_alarms(&self) -> Result<Vec<AlarmRecord>, StoreError> {
    let t0 = Instant::now();
    let resp = self.client.get(self.alarms_url())
      .header(USER_AGENT, "mathalarm-backend/0.1")
      .send().await?;
    let records = Self::check(resp, None)?.json::<Vec<AlarmRecord>>().await?;
    info!(target: "mathalarm_backend", count = records.len(), elapsed_ms = t0.elapsed().as_millis() as u64, "Store list_alarms ok");
    Ok(records)
  }

  #[instrument(level = "info", skip(self, spec), fields(time = %spec.time))]
  async fn create_alarm(&self, spec: AlarmSpec) -> Result<AlarmRecord, StoreError> {
    let resp = self.client.post(self.alarms_url())
      .header(USER_AGENT, "mathalarm-backend/0.1")
      .json(&spec)
      .send().await?;
    Ok(Self::check(resp, None)?.json::<AlarmRecord>().await?)
  }

  #[instrument(level = "info", skip(self))]
  async fn update_alarm(&self, id: AlarmId, patch: AlarmPatch) -> Result<AlarmRecord, StoreError> {
    let resp = self.client.patch(self.alarm_url(id))
      .header(USER_AGENT, "mathalarm-backend/0.1")
      .json(&patch)
      .send().await?;
    Ok(Self::check(resp, Some(id))?.json::<AlarmRecord>().await?)
  }

  #[instrument(level = "info", skip(self))]
  async fn delete_alarm(&self, id: AlarmId) -> Result<(), StoreError> {
    let resp = self.client.delete(self.alarm_url(id))
      .header(USER_AGENT, "mathalarm-backend/0.1")
      .send().await?;
    Self::check(resp, Some(id))?;
    Ok(())
  }
}

/// In-process store. Ids are assigned sequentially after the highest seeded id.
pub struct MemoryAlarmStore {
  records: RwLock<Vec<AlarmRecord>>,
  next_id: AtomicI64,
}

impl MemoryAlarmStore {
  pub fn new(seed: Vec<AlarmRecord>) -> Self {
    let next = seed.iter().map(|r| r.id).max().unwrap_or(0) + 1;
    Self { records: RwLock::new(seed), next_id: AtomicI64::new(next) }
  }
}

impl Default for MemoryAlarmStore {
  fn default() -> Self { Self::new(Vec::new()) }
}

#[async_trait]
impl AlarmStore for MemoryAlarmStore {
  async fn list_alarms(&self) -> Result<Vec<AlarmRecord>, StoreError> {
    Ok(self.records.read().await.clone())
  }

  async fn create_alarm(&self, spec: AlarmSpec) -> Result<AlarmRecord, StoreError> {
    let rec = AlarmRecord { id: self.next_id.fetch_add(1, Ordering::SeqCst), spec };
    self.records.write().await.push(rec.clone());
    Ok(rec)
  }

  async fn update_alarm(&self, id: AlarmId, patch: AlarmPatch) -> Result<AlarmRecord, StoreError> {
    let mut records = self.records.write().await;
    let rec = records.iter_mut().find(|r| r.id == id).ok_or(StoreError::NotFound(id))?;
    if let Some(enabled) = patch.enabled {
      rec.spec.enabled = enabled;
    }
    Ok(rec.clone())
  }

  async fn delete_alarm(&self, id: AlarmId) -> Result<(), StoreError> {
    let mut records = self.records.write().await;
    let before = records.len();
    records.retain(|r| r.id != id);
    if records.len() == before {
      return Err(StoreError::NotFound(id));
    }
    Ok(())
  }
}
