//! Realtime delivery
//!
//! Sessions are registered per user and addressed by opaque handles; the
//! transport only ever sees a handle and a frame queue.

pub mod backoff;
pub mod dispatcher;
pub mod message;
pub mod registry;
pub mod session;

pub use backoff::Backoff;
pub use dispatcher::{Connection, RealtimeDispatcher, DEFAULT_PUSH_TIMEOUT, DEFAULT_SESSION_BUFFER};
pub use message::{ClientMessage, PushMessage};
pub use registry::SessionRegistry;
pub use session::{ConnectionState, RealtimeSession, Session, SessionHandle};
