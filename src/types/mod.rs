//! Shared types for caseguard

pub mod error;

pub use error::{CaseguardError, Result, NOT_AUTHORIZED};
