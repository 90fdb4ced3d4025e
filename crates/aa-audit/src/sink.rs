// sink.rs — Where audit events go.
//
// The authorization service writes through the AuditSink trait so it can
// target the JSONL file in production and an in-memory chain in tests.

use std::sync::{Mutex, MutexGuard};

use crate::error::AuditError;
use crate::event::AuditEvent;
use crate::hasher;
use crate::log::AuditLog;

/// Destination for audit events. Implementations must be safe to share
/// across request threads.
pub trait AuditSink: Send + Sync {
    /// Append one event and return it as recorded (with `previous_hash` set).
    fn record(&self, event: AuditEvent) -> Result<AuditEvent, AuditError>;
}

impl AuditSink for Mutex<AuditLog> {
    fn record(&self, mut event: AuditEvent) -> Result<AuditEvent, AuditError> {
        lock(self).append(&mut event)?;
        Ok(event)
    }
}

/// Hash-chained audit trail held in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.events).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that every event links to the one before it.
    pub fn verify_chain(&self) -> Result<usize, AuditError> {
        let events = lock(&self.events);
        let mut previous: Option<String> = None;
        for (i, event) in events.iter().enumerate() {
            if event.previous_hash != previous {
                return Err(AuditError::IntegrityViolation {
                    line: i + 1,
                    expected: previous.unwrap_or_else(|| "None".to_string()),
                    actual: event.previous_hash.clone().unwrap_or_else(|| "None".to_string()),
                });
            }
            previous = Some(hasher::hash_json(event)?);
        }
        Ok(events.len())
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, mut event: AuditEvent) -> Result<AuditEvent, AuditError> {
        let mut events = lock(&self.events);
        event.previous_hash = match events.last() {
            Some(last) => Some(hasher::hash_json(last)?),
            None => None,
        };
        events.push(event.clone());
        Ok(event)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditKind;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn memory_sink_chains_events() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());
        let first = sink.record(AuditEvent::new("a1", AuditKind::Authorization)).unwrap();
        let second = sink.record(AuditEvent::new("a1", AuditKind::ConsentApproved)).unwrap();

        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash, Some(hasher::hash_json(&first).unwrap()));
        assert_eq!(sink.verify_chain().unwrap(), 2);
    }

    #[test]
    fn concurrent_records_keep_a_valid_chain() {
        let sink = Arc::new(MemoryAuditSink::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    sink.record(AuditEvent::new(format!("a{}", i), AuditKind::Authorization))
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sink.verify_chain().unwrap(), 8);
    }

    #[test]
    fn file_sink_behind_mutex_appends_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink: Box<dyn AuditSink> = Box::new(Mutex::new(AuditLog::open(&path).unwrap()));

        sink.record(AuditEvent::new("a1", AuditKind::Authorization)).unwrap();
        let second = sink.record(AuditEvent::new("a1", AuditKind::Authorization)).unwrap();

        assert!(second.previous_hash.is_some());
        assert_eq!(AuditLog::verify_chain(&path).unwrap(), 2);
    }
}
