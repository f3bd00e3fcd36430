//! System handlers: ping, method listing.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::instrument;

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;

/// Liveness check that also reports the current change version.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    #[instrument(skip(self, ctx), fields(method = "system.ping"))]
    async fn handle(&self, _params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({
            "pong": true,
            "version": ctx.versions.current(),
        }))
    }
}

/// Lists the method names known at registration time.
pub struct MethodsHandler {
    methods: Vec<String>,
}

impl MethodsHandler {
    /// Freeze the given (already sorted) method list.
    pub fn new(methods: Vec<String>) -> Self {
        Self { methods }
    }
}

#[async_trait]
impl MethodHandler for MethodsHandler {
    #[instrument(skip(self, _ctx), fields(method = "system.methods"))]
    async fn handle(&self, _params: Option<Value>, _ctx: &RpcContext) -> Result<Value, RpcError> {
        Ok(json!({ "methods": self.methods }))
    }
}
