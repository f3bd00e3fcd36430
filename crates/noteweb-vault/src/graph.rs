//! Note graph snapshot: one node per note, one edge per linked note pair.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::errors::StoreError;
use crate::markdown;
use crate::store::{NOTE_EXTENSION, NoteFile, NoteStore, parent_of, title_of};

/// A note in the graph. `id` and `path` are always equal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Stable identifier (the vault-relative path).
    pub id: String,
    /// Vault-relative path.
    pub path: String,
    /// File stem.
    pub title: String,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: i64,
    /// De-duplicated tags without the leading `#`.
    pub tags: Vec<String>,
}

/// Resolved links from `source` to `target`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// Linking note.
    pub source: String,
    /// Linked note.
    pub target: String,
    /// Number of link occurrences.
    pub count: u32,
}

/// Full node/edge view of the vault.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    /// Nodes sorted by path.
    pub nodes: Vec<Node>,
    /// Edges sorted by `(source, target)`.
    pub edges: Vec<Edge>,
}

/// Build a snapshot of every note in `store`.
///
/// A note that disappears between listing and reading still gets a node,
/// with no tags and no outgoing edges.
#[instrument(skip_all)]
pub async fn build_snapshot(store: &dyn NoteStore) -> Result<GraphSnapshot, StoreError> {
    let notes = store.list_notes().await?;
    let resolver = LinkResolver::new(&notes);

    let mut nodes = Vec::with_capacity(notes.len());
    let mut counts: BTreeMap<(String, String), u32> = BTreeMap::new();

    for note in &notes {
        let content = match store.read(&note.path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %note.path, error = %e, "failed to read note for snapshot");
                String::new()
            }
        };
        for link in markdown::extract_links(&content) {
            if let Some(target) = resolver.resolve(&note.path, &link) {
                *counts.entry((note.path.clone(), target)).or_insert(0) += 1;
            }
        }
        nodes.push(Node {
            id: note.path.clone(),
            path: note.path.clone(),
            title: title_of(&note.path),
            mtime: note.mtime,
            tags: markdown::extract_tags(&content),
        });
    }

    let edges: Vec<Edge> = counts
        .into_iter()
        .map(|((source, target), count)| Edge {
            source,
            target,
            count,
        })
        .collect();

    debug!(nodes = nodes.len(), edges = edges.len(), "snapshot built");
    Ok(GraphSnapshot { nodes, edges })
}

/// Maps raw link text to existing note paths.
///
/// Resolution order: exact path, path with `.md` appended, relative to the
/// linking note's folder, then a case-insensitive basename match where the
/// shortest path wins.
#[derive(Debug)]
pub struct LinkResolver {
    paths: HashSet<String>,
    by_name: HashMap<String, Vec<String>>,
}

impl LinkResolver {
    /// Index the given notes.
    pub fn new(notes: &[NoteFile]) -> Self {
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for note in notes {
            by_name
                .entry(title_of(&note.path).to_lowercase())
                .or_default()
                .push(note.path.clone());
        }
        for candidates in by_name.values_mut() {
            candidates.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
        }
        Self {
            paths: notes.iter().map(|n| n.path.clone()).collect(),
            by_name,
        }
    }

    /// Resolve `target` as written in the note at `source`.
    pub fn resolve(&self, source: &str, target: &str) -> Option<String> {
        let target = target.trim().trim_start_matches('/');
        if target.is_empty() {
            return None;
        }
        let mut candidates = vec![target.to_owned()];
        if !target.ends_with(NOTE_EXTENSION) {
            candidates.push(format!("{target}{NOTE_EXTENSION}"));
        }

        for candidate in &candidates {
            if self.paths.contains(candidate) {
                return Some(candidate.clone());
            }
        }

        let folder = parent_of(source);
        for candidate in &candidates {
            if let Some(joined) = join_relative(folder, candidate) {
                if self.paths.contains(&joined) {
                    return Some(joined);
                }
            }
        }

        let name = target.rsplit('/').next().unwrap_or(target);
        let stem = name.strip_suffix(NOTE_EXTENSION).unwrap_or(name);
        self.by_name
            .get(&stem.to_lowercase())
            .and_then(|paths| paths.first())
            .cloned()
    }
}

/// Join `rel` onto `folder`, applying `.` and `..`. `None` if it escapes.
fn join_relative(folder: &str, rel: &str) -> Option<String> {
    let mut parts: Vec<&str> = folder.split('/').filter(|s| !s.is_empty()).collect();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                let _ = parts.pop()?;
            }
            s => parts.push(s),
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}
