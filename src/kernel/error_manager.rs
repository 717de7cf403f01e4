//! Kernel child subsystem backing `kernel://error/record/{type}` and
//! `kernel://error/query/*`: a bounded, in-memory error log.
//!
//! Grounded on the teacher's bounded-buffer shape (`queue::BoundedQueue`,
//! reused directly rather than re-implemented) sized via
//! `config.boundedErrorStore.capacity`, per `spec.md`'s note that error
//! records share the same capacity-bound discipline as message queues.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::ctx::CtxValue;
use crate::error::ErrorKind;
use crate::message::ErrorQueryKind;
use crate::queue::{BoundedQueue, EvictionPolicy};

pub const DEFAULT_ERROR_STORE_CAPACITY: usize = 512;

pub fn error_store_capacity_from_config(ctx: &CtxValue) -> usize {
    ctx.get_path("config.boundedErrorStore.capacity")
        .and_then(|v| v.as_i64())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_ERROR_STORE_CAPACITY)
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub error_type: String,
    pub detail: CtxValue,
    pub recorded_at_ms: u64,
}

impl PartialEq for ErrorRecord {
    fn eq(&self, other: &Self) -> bool {
        self.error_type == other.error_type && self.recorded_at_ms == other.recorded_at_ms
    }
}

#[derive(Debug, Clone)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_type: Vec<(String, usize)>,
}

/// `kernel://error/record/{type}` and `kernel://error/query/*` backing
/// store. `capacity` caps the log's memory footprint — oldest records drop
/// first, matching the bounded-queue eviction discipline used everywhere
/// else in the kernel.
pub struct ErrorManager {
    records: BoundedQueue<ErrorRecord>,
}

impl ErrorManager {
    pub fn new(capacity: usize) -> Self {
        Self { records: BoundedQueue::new(capacity.max(1), EvictionPolicy::DropOldest).expect("capacity is at least 1") }
    }

    pub fn record(&mut self, kind: ErrorKind, detail: CtxValue) {
        self.records.enqueue(ErrorRecord {
            error_type: kind.record_segment().to_string(),
            detail,
            recorded_at_ms: now_millis(),
        });
    }

    pub fn record_type(&mut self, error_type: impl Into<String>, detail: CtxValue) {
        self.records.enqueue(ErrorRecord { error_type: error_type.into(), detail, recorded_at_ms: now_millis() });
    }

    pub fn query(&self, query: &ErrorQueryKind) -> Vec<ErrorRecord> {
        match query {
            ErrorQueryKind::Recent => self.records.peek_all().cloned().collect(),
            ErrorQueryKind::ByType(error_type) => {
                self.records.peek_all().filter(|r| &r.error_type == error_type).cloned().collect()
            }
            ErrorQueryKind::Summary => Vec::new(),
        }
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut by_type: Vec<(String, usize)> = Vec::new();
        for record in self.records.peek_all() {
            match by_type.iter_mut().find(|(t, _)| t == &record.error_type) {
                Some((_, count)) => *count += 1,
                None => by_type.push((record.error_type.clone(), 1)),
            }
        }
        by_type.sort();
        ErrorSummary { total: self.records.size(), by_type }
    }
}
