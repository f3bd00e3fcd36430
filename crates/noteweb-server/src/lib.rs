//! # noteweb-server
//!
//! Axum HTTP + `WebSocket` server for the note graph.
//!
//! - `GET /ws`: one JSON-RPC 2.0 session per socket, with heartbeat
//! - `GET /health`: liveness, connection count and change version
//! - `GET /metrics`: Prometheus text, when a recorder handle is supplied
//! - Change bridge: every version bump becomes a `graph.changed` broadcast
//! - Graceful stop: sessions are drained with "server stopping"

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::ServerError;
pub use server::NoteServer;
