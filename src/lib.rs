//! Caseguard - access control, audit trail and notifications for case work
//!
//! Every mutation of a case, document, comment, user, office or payment
//! passes through one pipeline: the policy engine decides, the change and
//! its audit entry commit together, and the people who need to know are
//! notified afterwards, live when they are connected and by pull otherwise.
//!
//! ## Modules
//!
//! - **auth**: privacy wall, capability table, policy engine, JWT sessions
//! - **audit**: diffing, severity, hash-chained append-only entries
//! - **notify**: event classifier and the dedup-aware notification store
//! - **realtime**: per-user session registry and push dispatcher
//! - **db**: storage traits with in-memory and MongoDB backends
//! - **core**: the mutation pipeline and query surface

pub mod audit;
pub mod auth;
pub mod config;
pub mod core;
pub mod db;
pub mod model;
pub mod notify;
pub mod realtime;
pub mod server;
pub mod types;

pub use config::Args;
pub use crate::core::{CaseCore, CoreConfig, Mutation, MutationOutcome};
pub use server::{run, AppState};
pub use types::{CaseguardError, Result};
