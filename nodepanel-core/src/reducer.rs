use std::time::SystemTime;

use crate::model::{Node, NodeId, Selection, ServiceBinding};
use crate::state::DirectoryState;

#[derive(Clone, Debug, PartialEq)]
pub enum DirectoryEvent {
    /// A full listing arrived. `as_of` is the mutation count observed
    /// when the request was issued.
    NodesLoaded { nodes: Vec<Node>, as_of: u64 },
    NodeAdded { node: Node },
    NodeUpdated { node: Node },
    NodeRemoved { id: NodeId },
    /// Backend acknowledged a reconnect; status is left as it was
    ReconnectRequested { id: NodeId },
    SelectionChanged { selection: Selection },
    BindingsLoaded {
        node_id: NodeId,
        bindings: Vec<ServiceBinding>,
    },
}

#[derive(Clone, Debug)]
pub struct EventEnvelope {
    pub id: u64,
    pub at: SystemTime,
    pub event: DirectoryEvent,
}

fn mark_mutated(state: &mut DirectoryState) {
    state.mutations += 1;
    state.stale = true;
}

fn clear_selection_of(state: &mut DirectoryState, id: NodeId) {
    match state.selection {
        Selection::Editing(sel) | Selection::Deleting(sel) if sel == id => {
            state.selection = Selection::None;
        }
        _ => {}
    }
}

pub fn reduce(state: &mut DirectoryState, env: &EventEnvelope) {
    state.last_event_id = env.id;

    match &env.event {
        DirectoryEvent::NodesLoaded { nodes, as_of } => {
            state.nodes = nodes.clone();
            state.loaded = true;
            // A mutation that landed while this listing was in flight may
            // not be reflected in it yet.
            state.stale = state.mutations != *as_of;

            let present: Vec<NodeId> = state.nodes.iter().map(|n| n.id).collect();
            state.bindings.retain(|id, _| present.contains(id));
            // Listed ids are live again, even if the backend reused one
            state.removed.retain(|id| !present.contains(id));
            match state.selection {
                Selection::Editing(id) | Selection::Deleting(id) if !present.contains(&id) => {
                    state.selection = Selection::None;
                }
                _ => {}
            }
        }
        DirectoryEvent::NodeAdded { node } => {
            state.removed.remove(&node.id);
            match state.nodes.iter_mut().find(|n| n.id == node.id) {
                Some(existing) => *existing = node.clone(),
                None => state.nodes.push(node.clone()),
            }
            mark_mutated(state);
        }
        DirectoryEvent::NodeUpdated { node } => {
            if let Some(existing) = state.nodes.iter_mut().find(|n| n.id == node.id) {
                *existing = node.clone();
            }
            clear_selection_of(state, node.id);
            mark_mutated(state);
        }
        DirectoryEvent::NodeRemoved { id } => {
            state.nodes.retain(|n| n.id != *id);
            state.bindings.remove(id);
            state.removed.insert(*id);
            clear_selection_of(state, *id);
            mark_mutated(state);
        }
        DirectoryEvent::ReconnectRequested { .. } => mark_mutated(state),
        DirectoryEvent::SelectionChanged { selection } => state.selection = *selection,
        DirectoryEvent::BindingsLoaded { node_id, bindings } => {
            if state.contains(*node_id) {
                state.bindings.insert(*node_id, bindings.clone());
            }
        }
    }
}
