//! Rolling error statistics
//!
//! Informational only; nothing in the control flow reads these counters.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use clientkey_common::resilience::CircuitState;
use parking_lot::Mutex;
use serde::Serialize;

use crate::classifier::ErrorKind;

/// The most recent failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub operation: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStatsSnapshot {
    pub total_errors: u64,
    pub connection_errors: u64,
    pub timeout_errors: u64,
    pub validation_errors: u64,
    pub unknown_errors: u64,
    pub circuit_rejections: u64,
    pub errors_by_operation: HashMap<String, u64>,
    pub last_error: Option<ErrorRecord>,
    pub recovery_successes: u64,
    #[serde(serialize_with = "serialize_state")]
    pub circuit_state: CircuitState,
    pub circuit_failure_count: u64,
    pub queued_operations: usize,
    pub queue_processing: bool,
}

fn serialize_state<S: serde::Serializer>(state: &CircuitState, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(state)
}

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    by_kind: HashMap<ErrorKind, u64>,
    circuit_rejections: u64,
    by_operation: HashMap<String, u64>,
    last_error: Option<ErrorRecord>,
    recoveries: u64,
}

#[derive(Debug, Default)]
pub struct ErrorStats {
    counters: Mutex<Counters>,
}

impl ErrorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_error(&self, kind: ErrorKind, operation: &str, message: &str, at: DateTime<Utc>) {
        let mut counters = self.counters.lock();
        counters.total += 1;
        *counters.by_kind.entry(kind).or_default() += 1;
        *counters.by_operation.entry(operation.to_string()).or_default() += 1;
        counters.last_error = Some(ErrorRecord {
            kind,
            operation: operation.to_string(),
            message: message.to_string(),
            timestamp: at,
        });
    }

    /// A call the breaker rejected without reaching the backend
    pub fn record_rejection(&self, operation: &str, at: DateTime<Utc>) {
        self.record_error(ErrorKind::Connection, operation, "circuit breaker open", at);
        self.counters.lock().circuit_rejections += 1;
    }

    /// A fallback produced a result for a failed call
    pub fn record_recovery(&self) {
        self.counters.lock().recoveries += 1;
    }

    pub fn reset(&self) {
        *self.counters.lock() = Counters::default();
    }

    pub fn snapshot(
        &self,
        circuit_state: CircuitState,
        circuit_failure_count: u64,
        queued_operations: usize,
        queue_processing: bool,
    ) -> ErrorStatsSnapshot {
        let counters = self.counters.lock();
        let kind = |k: ErrorKind| counters.by_kind.get(&k).copied().unwrap_or(0);
        ErrorStatsSnapshot {
            total_errors: counters.total,
            connection_errors: kind(ErrorKind::Connection),
            timeout_errors: kind(ErrorKind::Timeout),
            validation_errors: kind(ErrorKind::Validation),
            unknown_errors: kind(ErrorKind::Unknown),
            circuit_rejections: counters.circuit_rejections,
            errors_by_operation: counters.by_operation.clone(),
            last_error: counters.last_error.clone(),
            recovery_successes: counters.recoveries,
            circuit_state,
            circuit_failure_count,
            queued_operations,
            queue_processing,
        }
    }
}
