//! WebSocket server module
//!
//! Accepts client connections and translates between WebSocket frames and
//! relay envelopes.

mod handler;
mod protocol;
mod websocket;

pub use protocol::*;
pub use websocket::*;
