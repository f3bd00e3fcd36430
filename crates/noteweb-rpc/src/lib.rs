//! # noteweb-rpc
//!
//! JSON-RPC 2.0 layer for the note-graph server.
//!
//! - [`types`]: envelope model and strict frame classification
//! - [`registry`]: method name → handler dispatch with timeouts and metrics
//! - [`peer::RpcPeer`]: one full-duplex endpoint per socket (serves incoming
//!   requests, issues outgoing calls, drains on close)
//! - [`version::ChangeVersion`]: monotonic counter clients use to skip
//!   redundant snapshot fetches
//! - [`handlers`]: graph, note, search and system methods

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod handlers;
pub mod peer;
pub mod registry;
pub mod types;
pub mod validation;
pub mod version;

pub use context::{HandlerLimits, RpcContext};
pub use errors::{CallError, RpcError};
pub use peer::{CloseReason, Outbound, RpcPeer};
pub use registry::{MethodHandler, MethodRegistry};
pub use types::{ErrorObject, Message, Notification, Request, Response, RpcId};
pub use version::ChangeVersion;
