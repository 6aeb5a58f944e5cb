//! Audit trail of operator actions and engine state changes.
//!
//! One JSON object per line. Entries carry both the engine-relative
//! monotonic time and wall-clock time.

use reactor_core::{EngineState, TimeBase};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// Types of events that are logged in the audit trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Engine built and tick thread started
    EngineStart,
    /// Engine state changed (Idle, Running, SafetyStop, Fault)
    StateTransition,
    /// Operator command accepted by the engine
    CommandAccepted,
    /// Operator command refused, with the reason
    CommandRejected,
    /// Engine stopped and actuators driven safe
    EngineShutdown,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic timestamp in microseconds
    pub timestamp_us: u64,
    /// Wall-clock Unix timestamp in microseconds
    pub unix_us: u64,
    pub event_type: AuditEventType,
    pub details: serde_json::Value,
}

/// Thread-safe audit logger that writes to a JSONL file
pub struct AuditLogger {
    writer: Mutex<BufWriter<File>>,
    timebase: TimeBase,
}

impl AuditLogger {
    /// Create a new audit logger writing to the specified path.
    /// The file is opened in append mode to preserve existing logs.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::with_capacity(8192, file)),
            timebase: TimeBase::new(),
        })
    }

    /// Log an audit entry. This is thread-safe and can be called from any thread.
    pub fn log(&self, entry: AuditEntry) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Log an event stamped with the current time.
    pub fn record(&self, event_type: AuditEventType, details: impl Serialize) -> std::io::Result<()> {
        let details = serde_json::to_value(details)?;
        self.log(AuditEntry {
            timestamp_us: self.timebase.now_us(),
            unix_us: self.timebase.unix_us(),
            event_type,
            details,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StateTransitionDetails {
    pub sequence: u64,
    pub from: EngineState,
    pub to: EngineState,
    pub trip: Option<String>,
    pub fault: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandDetails<'a> {
    pub command: &'a str,
    pub line: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
