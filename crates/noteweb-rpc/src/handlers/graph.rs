//! Graph handlers: snapshot with version short-circuit.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;
use crate::validation::parse_params;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SnapshotParams {
    since_version: Option<Value>,
}

impl SnapshotParams {
    /// Client's cached version. Non-numeric values are ignored.
    fn since(&self) -> Option<f64> {
        self.since_version.as_ref().and_then(Value::as_f64)
    }
}

/// Returns the full node/edge graph, or `{changed: false}` when the
/// client's `sinceVersion` is already current.
pub struct GetSnapshotHandler;

#[async_trait]
impl MethodHandler for GetSnapshotHandler {
    #[instrument(skip(self, ctx), fields(method = "graph.getSnapshot"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        // Positional (array) params would otherwise fill `sinceVersion`.
        let params: SnapshotParams =
            parse_params(params.filter(Value::is_object)).unwrap_or_default();
        // Read before building so a concurrent bump is never hidden.
        let version = ctx.versions.current();

        #[allow(clippy::cast_precision_loss)]
        if params.since().is_some_and(|since| since >= version as f64) {
            debug!(version, "snapshot unchanged");
            return Ok(json!({ "version": version, "changed": false }));
        }

        let snapshot = noteweb_vault::build_snapshot(ctx.store.as_ref()).await?;
        Ok(json!({
            "version": version,
            "nodes": snapshot.nodes,
            "edges": snapshot.edges,
        }))
    }
}
