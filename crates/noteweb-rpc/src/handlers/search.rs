//! Search handler: case-insensitive substring scan over notes.

use async_trait::async_trait;
use noteweb_vault::title_of;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;
use crate::validation::{parse_params, require_non_empty};

/// Maximum snippet length, in characters.
const SNIPPET_CHARS: usize = 160;

#[derive(Debug, Deserialize)]
struct QueryParams {
    #[serde(default)]
    q: String,
    #[serde(default)]
    limit: Option<f64>,
}

/// Scans note content, then path, for the query text.
pub struct QueryHandler;

#[async_trait]
impl MethodHandler for QueryHandler {
    #[instrument(skip(self, ctx), fields(method = "search.query"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let params: QueryParams = parse_params(params)?;
        let query = require_non_empty(&params.q, "q")?;
        let needle = query.to_lowercase();
        let limit = effective_limit(
            params.limit,
            ctx.limits.search_default_limit,
            ctx.limits.search_max_limit,
        );

        let mut results = Vec::new();
        for note in ctx.store.list_notes().await? {
            if results.len() >= limit {
                break;
            }
            let content = match ctx.store.read(&note.path).await {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %note.path, error = %err, "skipping unreadable note");
                    continue;
                }
            };
            let snippet = content
                .lines()
                .find_map(|line| snippet_around(line, &needle))
                .or_else(|| {
                    note.path
                        .to_lowercase()
                        .contains(&needle)
                        .then(|| leading_snippet(&content))
                });
            if let Some(snippet) = snippet {
                results.push(json!({
                    "path": note.path,
                    "title": title_of(&note.path),
                    "snippet": snippet,
                }));
            }
        }

        debug!(query, limit, hits = results.len(), "search finished");
        Ok(json!({ "query": query, "results": results }))
    }
}

/// Requested limit floored and clamped to `[1, max]`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn effective_limit(requested: Option<f64>, default: usize, max: usize) -> usize {
    let max = max.max(1);
    match requested {
        Some(limit) if limit.is_finite() => limit.floor().clamp(1.0, max as f64) as usize,
        _ => default.clamp(1, max),
    }
}

/// Up to [`SNIPPET_CHARS`] of `line` centred on the first match, if any.
fn snippet_around(line: &str, needle: &str) -> Option<String> {
    let lowered = line.to_lowercase();
    let byte_idx = lowered.find(needle)?;

    let chars: Vec<char> = line.chars().collect();
    if chars.len() <= SNIPPET_CHARS {
        return Some(line.trim().to_owned());
    }
    // Lowercasing can change lengths; clamp the mapped position.
    let match_at = lowered[..byte_idx].chars().count().min(chars.len());
    let needle_len = needle.chars().count();
    let lead = SNIPPET_CHARS.saturating_sub(needle_len) / 2;
    let start = match_at
        .saturating_sub(lead)
        .min(chars.len() - SNIPPET_CHARS);
    let window: String = chars[start..start + SNIPPET_CHARS].iter().collect();
    Some(window.trim().to_owned())
}

/// First non-blank line, for hits on the path alone.
fn leading_snippet(content: &str) -> String {
    content
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .chars()
        .take(SNIPPET_CHARS)
        .collect()
}
