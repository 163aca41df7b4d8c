//! Real-time event distribution: connection registry, event router, and the
//! WebSocket bridge.

mod events;
mod registry;
mod ws;

pub use events::{ClientMessage, ServerEvent};
pub use registry::{ConnectionHandle, ConnectionRegistry, EventRouter, HeartbeatConfig};
pub use ws::ws_handler;
