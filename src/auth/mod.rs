//! Authentication and authorization
//!
//! Provides:
//! - The static capability table and sensitivity wall
//! - The policy engine every layer asks for allow/deny decisions
//! - JWT session tokens that yield the request actor

pub mod jwt;
pub mod permissions;
pub mod policy;

pub use jwt::{
    extract_token_from_header, extract_token_from_query, Claims, JwtValidator, SessionProvider,
};
pub use permissions::{Capability, WallRule, CAPABILITIES, SENSITIVITY_WALL};
pub use policy::{DecisionReason, PermissionDecision, PolicyEngine};
