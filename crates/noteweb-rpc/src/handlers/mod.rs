//! RPC method handlers for the note graph.

pub mod graph;
pub mod note;
pub mod search;
pub mod system;

use crate::registry::MethodRegistry;

/// Register every built-in method.
///
/// `note.new` is an alias of `note.create`. `system.methods` is registered
/// last so its listing includes itself.
pub fn register_all(registry: &mut MethodRegistry) {
    // System
    registry.register("system.ping", system::PingHandler);

    // Graph
    registry.register("graph.getSnapshot", graph::GetSnapshotHandler);

    // Notes
    registry.register("note.getPreview", note::GetPreviewHandler);
    registry.register("note.create", note::CreateNoteHandler);
    let _ = registry.alias("note.new", "note.create");

    // Search
    registry.register("search.query", search::QueryHandler);

    let mut methods = registry.methods();
    methods.push("system.methods".to_owned());
    methods.sort();
    registry.register("system.methods", system::MethodsHandler::new(methods));
}
