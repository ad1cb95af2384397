//! Notifications
//!
//! Provides:
//! - The event classifier and its routing table
//! - Durable notification rows and the dedup-aware store

pub mod classifier;
pub mod intent;
pub mod notification;
pub mod store;

pub use classifier::{
    classify, dedup_key, CaseContext, DedupPolicy, EventKind, MutationEvent, RecipientSlot, Route,
    ROUTES,
};
pub use intent::NotificationIntent;
pub use notification::Notification;
pub use store::NotificationStore;
