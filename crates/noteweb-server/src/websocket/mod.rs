//! WebSocket frame codec, connection queues, session lifecycle, live-session
//! broadcast and the change bridge.

pub mod bridge;
pub mod broadcast;
pub mod codec;
pub mod connection;
pub mod session;
