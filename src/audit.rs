//! Audit trail for license state changes.
//!
//! The engine and the bulk coordinator emit an [`AuditEvent`] for every key
//! generated, activation, deactivation, forced revocation and bulk mutation.
//! Delivery is fire-and-forget: [`emit`] logs a failing sink and moves on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::logging::log_license_event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    KeyGenerated,
    Activated,
    AlreadyActive,
    ActivationDenied,
    Deactivated,
    ForceDeactivated,
    Validated,
    ValidationFailed,
    BulkMutated,
    Restored,
    Expired,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::KeyGenerated => "key_generated",
            AuditEventType::Activated => "activated",
            AuditEventType::AlreadyActive => "already_active",
            AuditEventType::ActivationDenied => "activation_denied",
            AuditEventType::Deactivated => "deactivated",
            AuditEventType::ForceDeactivated => "force_deactivated",
            AuditEventType::Validated => "validated",
            AuditEventType::ValidationFailed => "validation_failed",
            AuditEventType::BulkMutated => "bulk_mutated",
            AuditEventType::Restored => "restored",
            AuditEventType::Expired => "expired",
        }
    }

    /// Failures are logged at `warn`, everything else at `info`.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEventType::ActivationDenied | AuditEventType::ValidationFailed
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub subject_key: String,
    pub event_type: AuditEventType,
    pub message: String,
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        subject_key: impl Into<String>,
        event_type: AuditEventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_key: subject_key.into(),
            event_type,
            message: message.into(),
            context: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a context value. Values that fail to serialize are skipped.
    pub fn with(mut self, field: &str, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(field.to_string(), value);
        }
        self
    }
}

#[derive(Debug, Error)]
#[error("audit sink failure: {0}")]
pub struct AuditError(pub String);

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Deliver `event`, logging instead of failing when the sink refuses it.
pub fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    let key = event.subject_key.clone();
    let event_type = event.event_type;
    if let Err(e) = sink.record(event) {
        warn!(license_key = %key, event = %event_type, "dropping audit event: {e}");
    }
}

/// Writes audit events as structured `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let details = if event.context.is_empty() {
            event.message.clone()
        } else {
            format!("{} {}", event.message, Value::Object(event.context))
        };
        log_license_event(event.event_type, &event.subject_key, Some(&details));
        Ok(())
    }
}

/// Keeps the most recent events per license in memory.
#[derive(Debug)]
pub struct MemoryAuditLog {
    max_entries: usize,
    entries: Mutex<HashMap<String, VecDeque<AuditEvent>>>,
}

impl MemoryAuditLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Events for `key`, oldest first.
    pub fn entries(&self, key: &str) -> Vec<AuditEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every retained event of the given type, across all licenses.
    pub fn of_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut events: Vec<AuditEvent> = entries
            .values()
            .flatten()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.timestamp);
        events
    }
}

impl Default for MemoryAuditLog {
    fn default() -> Self {
        Self::new(50)
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuditError("audit log lock poisoned".to_string()))?;
        let log = entries.entry(event.subject_key.clone()).or_default();
        log.push_back(event);
        while log.len() > self.max_entries {
            log.pop_front();
        }
        Ok(())
    }
}

/// Forwards every event to each inner sink.
#[derive(Default, Clone)]
pub struct FanOutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanOutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanOutAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        for sink in &self.sinks {
            emit(sink.as_ref(), event.clone());
        }
        Ok(())
    }
}
