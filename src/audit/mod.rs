//! Audit trail
//!
//! Every mutation produces exactly one append-only entry, written in the
//! mutation's own transaction and chained by hash to its predecessor.

pub mod chain;
pub mod diff;
pub mod entry;
pub mod recorder;
pub mod severity;
pub mod view;

pub use chain::{seal, verify_chain, ChainBreak};
pub use diff::changed_fields;
pub use entry::{
    AuditAction, AuditDraft, AuditEntry, Severity, TAG_POLICY_ANOMALY, TAG_SENSITIVE_FIELDS,
    TAG_SENSITIVE_READ,
};
pub use recorder::AuditRecorder;
pub use view::AuditView;
