//! Note handlers: preview, create.

use async_trait::async_trait;
use noteweb_vault::markdown::{excerpt, extract_tags};
use noteweb_vault::{EntryKind, NOTE_EXTENSION, normalize_note_path, title_of};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use crate::context::RpcContext;
use crate::errors::RpcError;
use crate::registry::MethodHandler;
use crate::validation::{parse_params, require_non_empty};

#[derive(Debug, Deserialize)]
struct PreviewParams {
    #[serde(default)]
    path: String,
}

/// Title, tags and the leading lines of one note.
pub struct GetPreviewHandler;

#[async_trait]
impl MethodHandler for GetPreviewHandler {
    #[instrument(skip(self, ctx), fields(method = "note.getPreview"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let params: PreviewParams = parse_params(params)?;
        let path = normalize_note_path(require_non_empty(&params.path, "path")?)?;

        let Some(entry) = ctx.store.stat(&path).await? else {
            return Err(RpcError::NotFound {
                message: format!("Note not found: {path}"),
            });
        };
        if !entry.is_note() {
            return Err(RpcError::BadRequest {
                message: format!("Not a note: {path}"),
            });
        }

        let content = ctx.store.read(&path).await?;
        Ok(json!({
            "title": title_of(&path),
            "mtime": entry.mtime,
            "tags": extract_tags(&content),
            "excerpt": excerpt(&content, ctx.limits.preview_lines),
            "path": path,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct CreateParams {
    #[serde(default)]
    path: String,
    #[serde(default)]
    heading: String,
    #[serde(default)]
    body: String,
}

/// Create a new note with a top-level heading, making parent folders.
pub struct CreateNoteHandler;

impl CreateNoteHandler {
    /// Create each missing ancestor folder of `path`, outermost first.
    async fn ensure_parents(ctx: &RpcContext, path: &str) -> Result<(), RpcError> {
        let segments: Vec<&str> = path.split('/').collect();
        let Some((_, parents)) = segments.split_last() else {
            return Ok(());
        };
        let mut current = String::new();
        for segment in parents {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);

            match ctx.store.stat(&current).await? {
                Some(entry) if entry.kind == EntryKind::Folder => {}
                Some(_) => {
                    return Err(RpcError::Conflict {
                        message: format!("Path segment is not a folder: {current}"),
                    });
                }
                None => {
                    debug!(folder = %current, "creating folder");
                    ctx.store.create_folder(&current).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MethodHandler for CreateNoteHandler {
    #[instrument(skip(self, ctx), fields(method = "note.create"))]
    async fn handle(&self, params: Option<Value>, ctx: &RpcContext) -> Result<Value, RpcError> {
        let params: CreateParams = parse_params(params)?;
        let raw_path = require_non_empty(&params.path, "path")?;
        if !raw_path.ends_with(NOTE_EXTENSION) {
            return Err(RpcError::BadRequest {
                message: format!("Path must end with {NOTE_EXTENSION}: {raw_path}"),
            });
        }
        let heading = require_non_empty(&params.heading, "heading")?;
        let path = normalize_note_path(raw_path)?;

        match ctx.store.stat(&path).await? {
            Some(entry) if entry.kind == EntryKind::Folder => {
                return Err(RpcError::Conflict {
                    message: format!("A folder already exists at {path}"),
                });
            }
            Some(_) => {
                return Err(RpcError::AlreadyExists {
                    message: format!("Note already exists: {path}"),
                });
            }
            None => {}
        }

        Self::ensure_parents(ctx, &path).await?;

        let contents = format!("# {heading}\n\n{}", params.body);
        let note = ctx.store.write_new(&path, &contents).await?;
        info!(path = %note.path, "note created");

        Ok(json!({
            "title": title_of(&note.path),
            "mtime": note.mtime,
            "created": true,
            "path": note.path,
        }))
    }
}
