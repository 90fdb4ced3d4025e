//! # aa-audit
//!
//! Append-only, tamper-evident audit trail for AgentAuth.
//!
//! Every authorization decision and consent transition is recorded as an
//! [`AuditEvent`]. On disk the trail is a JSONL file where each line carries
//! the SHA-256 of the line before it, so [`AuditLog::verify_chain`] detects
//! any edit, insertion, or deletion.
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use aa_audit::{AuditEvent, AuditKind, AuditLog};
//!
//! let mut log = AuditLog::open("/tmp/audit.jsonl").unwrap();
//! let mut event = AuditEvent::new("agent-1", AuditKind::Authorization)
//!     .with_action("purchase")
//!     .with_decision("ALLOWED", "small purchase");
//! log.append(&mut event).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod hasher;
pub mod lock;
pub mod log;
pub mod sink;

pub use error::AuditError;
pub use event::{AuditEvent, AuditKind};
pub use lock::FileLock;
pub use log::AuditLog;
pub use sink::{AuditSink, MemoryAuditSink};
