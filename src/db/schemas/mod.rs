//! MongoDB document schemas

mod audit_entry;
mod entity;
mod metadata;
mod notification;

pub use audit_entry::{AuditEntryDoc, AUDIT_COLLECTION};
pub use entity::{EntityDoc, ENTITY_COLLECTION};
pub use metadata::Metadata;
pub use notification::{NotificationDoc, NOTIFICATION_COLLECTION};
