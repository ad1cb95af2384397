//! HTTP and WebSocket transport

pub mod http;
pub mod websocket;

pub use http::{run, AppState};
