//! Server lifecycle errors.

use std::net::SocketAddr;

/// Failure to start the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `start()` called while already listening.
    #[error("server is already listening on {0}")]
    AlreadyListening(SocketAddr),
}
