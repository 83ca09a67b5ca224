//! Realtime progress bus (C4): WebSocket pub/sub, confirmation callbacks,
//! heartbeats, broadcast/unicast-by-user.

mod bus;
mod event;
mod server;

pub use bus::{ConnectionId, ProgressBus};
pub use event::{BusEvent, BusEventType, ClientAction, ClientMessage, ErrorResponse};
pub use server::{router, BusState, HeartbeatSettings};
