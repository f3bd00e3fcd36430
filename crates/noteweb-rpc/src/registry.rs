//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::context::RpcContext;
use crate::errors::{self, RpcError};
use crate::types::{Notification, Request, Response};

/// Trait implemented by every RPC method handler.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler with the given params and context.
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Maximum time a single RPC handler is allowed to run.
    const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a method name, replacing any earlier one.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Bind `alias` to the handler currently registered as `target`.
    ///
    /// Returns `false` (and registers nothing) if `target` is unknown.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        let Some(handler) = self.handlers.get(target).cloned() else {
            return false;
        };
        let _ = self.handlers.insert(alias.to_owned(), handler);
        true
    }

    /// Dispatch a request to its handler and build the response.
    #[instrument(skip_all, fields(method = %request.method, id = %request.id))]
    pub async fn dispatch(&self, request: Request, ctx: &RpcContext) -> Response {
        let method = request.method;
        counter!("rpc_requests_total", "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            counter!("rpc_errors_total", "method" => method.clone(), "error_type" => "method_not_found").increment(1);
            return Response::error(
                request.id,
                errors::METHOD_NOT_FOUND,
                format!("Method not found: {method}"),
            );
        };

        let start = Instant::now();
        let result =
            tokio::time::timeout(Self::HANDLER_TIMEOUT, handler.handle(request.params, ctx)).await;

        let response = match result {
            Ok(Ok(result)) => Response::success(request.id, result),
            Ok(Err(err)) => {
                counter!("rpc_errors_total", "method" => method.clone(), "error_type" => err.kind()).increment(1);
                debug!(error = %err, "handler failed");
                Response::error(request.id, err.code(), err.to_string())
            }
            Err(_elapsed) => {
                counter!("rpc_errors_total", "method" => method.clone(), "error_type" => "timeout").increment(1);
                tracing::error!(method, "RPC handler timed out after {:?}", Self::HANDLER_TIMEOUT);
                Response::error(
                    request.id,
                    errors::APPLICATION_ERROR,
                    format!("Handler for '{method}' timed out"),
                )
            }
        };

        let duration = start.elapsed();
        histogram!("rpc_request_duration_seconds", "method" => method.clone())
            .record(duration.as_secs_f64());

        if duration.as_secs() >= 5 {
            warn!(
                method,
                duration_secs = duration.as_secs_f64(),
                "slow RPC request"
            );
        }

        response
    }

    /// Run the handler for a notification. Results and failures are dropped.
    #[instrument(skip_all, fields(method = %notification.method))]
    pub async fn notify(&self, notification: Notification, ctx: &RpcContext) {
        let method = notification.method;
        counter!("rpc_notifications_total", "method" => method.clone()).increment(1);

        let Some(handler) = self.handlers.get(&method) else {
            debug!("notification for unknown method ignored");
            return;
        };
        match tokio::time::timeout(Self::HANDLER_TIMEOUT, handler.handle(notification.params, ctx))
            .await
        {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!(error = %err, "notification handler failed"),
            Err(_elapsed) => warn!("notification handler timed out"),
        }
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}
