//! Error types for the alarm backend.
//!
//! Everything inside the engine is handled locally and logged; these types
//! mostly travel to the edges (HTTP/WS replies, store adapters, startup).

use thiserror::Error;

use crate::domain::AlarmId;

/// Errors surfaced by the alarm engine and the service around it.
#[derive(Error, Debug)]
pub enum AlarmError {
    /// Difficulty tag outside {easy, medium, hard}.
    #[error("invalid difficulty '{0}' (expected easy, medium or hard)")]
    InvalidDifficulty(String),

    #[error("invalid alarm time '{0}' (expected HH:MM)")]
    InvalidTime(String),

    #[error("invalid day tag '{0}' (expected one of sun, mon, tue, wed, thu, fri, sat)")]
    InvalidDay(String),

    /// No challenge is open for this alarm (never fired, or already dismissed).
    #[error("no active challenge for alarm {0}")]
    UnknownChallenge(AlarmId),

    /// The service actor is gone (shutdown or panic).
    #[error("alarm service is not running")]
    ServiceUnavailable,

    #[error("clock worker failed to start: {0}")]
    WorkerStart(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures talking to the persistence collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store replied {status} for {url}")]
    Status { status: u16, url: String },

    #[error("alarm {0} not found")]
    NotFound(AlarmId),
}

/// Failures of sound/vibration/notification side effects. Always transient.
#[derive(Error, Debug)]
pub enum EffectError {
    #[error("no UI client is listening for {0}")]
    NoListener(&'static str),

    #[error("effect backend panicked during {0}")]
    Panicked(&'static str),
}
