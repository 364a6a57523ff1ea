//! Audit trail of credential lifecycle events.
//!
//! The credential store reports every operation through an [`AuditSink`].
//! Production uses [`AuditTrail`], a day-partitioned, size-rotated log file
//! with gzip-compressed, count- and age-bounded backups. Tests and
//! embedders can inject [`MemoryAudit`] or [`NoopAudit`] instead.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub mod config;
mod rotation;
mod trail;


pub use config::AuditConfig;
pub use trail::AuditTrail;

/// Severity of an audit event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditLevel {
    Info,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Error => "error",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit write failures
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl AuditError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| AuditError::Io { path, source }
    }
}

/// Destination for audit events.
///
/// Implementations must be safe to call from many threads at once.
pub trait AuditSink: Send + Sync {
    fn record(&self, level: AuditLevel, message: &str) -> Result<(), AuditError>;
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _level: AuditLevel, _message: &str) -> Result<(), AuditError> {
        Ok(())
    }
}

/// One recorded event, as kept by [`MemoryAudit`].
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub message: String,
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, level: AuditLevel, message: &str) -> Result<(), AuditError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AuditEvent {
                timestamp: Utc::now(),
                level,
                message: message.to_string(),
            });
        Ok(())
    }
}
