//! Manager health, observable from outside the poll loop.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ManagerStatus {
    Stopped = 0,
    Running = 1,
    /// Loop exited on an infrastructure failure
    Halted = 2,
}

impl ManagerStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ManagerStatus::Running,
            2 => ManagerStatus::Halted,
            _ => ManagerStatus::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub kind: &'static str,
    pub status: ManagerStatus,
    pub passes: u64,
    pub advanced: u64,
    pub last_error: Option<String>,
    pub last_pass_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ManagerHealth {
    kind: &'static str,
    status: AtomicU8,
    passes: AtomicU64,
    advanced: AtomicU64,
    last_error: Mutex<Option<String>>,
    last_pass_at: Mutex<Option<DateTime<Utc>>>,
}

impl ManagerHealth {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            status: AtomicU8::new(ManagerStatus::Stopped as u8),
            passes: AtomicU64::new(0),
            advanced: AtomicU64::new(0),
            last_error: Mutex::new(None),
            last_pass_at: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Only a halted loop is unhealthy; a stopped one was asked to stop
    pub fn is_healthy(&self) -> bool {
        self.status() != ManagerStatus::Halted
    }

    pub(crate) fn set_status(&self, status: ManagerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn record_pass(&self, advanced: usize, at: DateTime<Utc>) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.advanced.fetch_add(advanced as u64, Ordering::Relaxed);
        *self.last_pass_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(at);
    }

    pub(crate) fn record_error(&self, error: impl Into<String>) {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(error.into());
    }

    pub(crate) fn halt(&self, error: impl Into<String>) {
        self.record_error(error);
        self.set_status(ManagerStatus::Halted);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            kind: self.kind,
            status: self.status(),
            passes: self.passes.load(Ordering::Relaxed),
            advanced: self.advanced.load(Ordering::Relaxed),
            last_error: self
                .last_error
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .clone(),
            last_pass_at: *self.last_pass_at.lock().unwrap_or_else(|p| p.into_inner()),
        }
    }
}
