//! The node directory: the one owner of the node cache.
//!
//! Every read (tables, status projection) and every write (node editor,
//! binding editor) goes through a `NodeDirectory`. Mutations are sent to
//! the backend first; the cache only changes from backend responses, and
//! every successful mutation marks the cache stale so the next
//! `list_nodes` re-reads backend truth.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use tokio::sync::broadcast;

use crate::api::PanelApi;
use crate::error::PanelError;
use crate::model::{Node, NodeForm, NodeId, Selection, ServiceBinding};
use crate::reducer::{DirectoryEvent, EventEnvelope, reduce};
use crate::state::{BusyKey, DirectoryState};
use crate::status::project_status;
use crate::validate::check_node_form;

/// Result of a confirmed delete
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The node was already gone, either from an earlier delete in this
    /// session or from another session
    AlreadyGone,
}

pub struct NodeDirectory {
    api: Arc<dyn PanelApi>,
    state: Mutex<DirectoryState>,
    events: broadcast::Sender<EventEnvelope>,
    next_event_id: AtomicU64,
}

/// Holds a busy key for the duration of one request
pub(crate) struct BusyGuard<'a> {
    directory: &'a NodeDirectory,
    key: BusyKey,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.directory.lock().busy.remove(&self.key);
    }
}

impl NodeDirectory {
    /// Empty cache, no selection
    pub fn new(api: Arc<dyn PanelApi>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            api,
            state: Mutex::new(DirectoryState::new()),
            events,
            next_event_id: AtomicU64::new(1),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.api.name()
    }

    /// Receive every change applied to the cache
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn api(&self) -> &dyn PanelApi {
        self.api.as_ref()
    }

    pub(crate) fn apply(&self, event: DirectoryEvent) {
        let env = EventEnvelope {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            at: SystemTime::now(),
            event,
        };
        reduce(&mut self.lock(), &env);
        let _ = self.events.send(env);
    }

    pub(crate) fn acquire(&self, key: BusyKey) -> Result<BusyGuard<'_>, PanelError> {
        let mut state = self.lock();
        if !state.busy.insert(key) {
            tracing::warn!(%key, "request refused, previous one still in flight");
            return Err(PanelError::Busy(key.to_string()));
        }
        Ok(BusyGuard {
            directory: self,
            key,
        })
    }

    // --- reads ---

    /// Snapshot of the cached nodes, in backend order
    pub fn nodes(&self) -> Vec<Node> {
        self.lock().nodes.clone()
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.lock().node(id).cloned()
    }

    pub fn bindings(&self, node_id: NodeId) -> Option<Vec<ServiceBinding>> {
        self.lock().bindings.get(&node_id).cloned()
    }

    pub fn selection(&self) -> Selection {
        self.lock().selection
    }

    pub fn is_busy(&self, id: NodeId) -> bool {
        self.lock().busy.contains(&BusyKey::Node(id))
    }

    pub fn is_creating(&self) -> bool {
        self.lock().busy.contains(&BusyKey::Create)
    }

    pub fn is_stale(&self) -> bool {
        self.lock().needs_fetch()
    }

    /// Cached nodes, fetching first if nothing was loaded yet or a
    /// mutation invalidated the cache
    pub async fn list_nodes(&self) -> Result<Vec<Node>, PanelError> {
        if self.is_stale() {
            self.refresh().await
        } else {
            Ok(self.nodes())
        }
    }

    /// Re-read the node list from the backend
    pub async fn refresh(&self) -> Result<Vec<Node>, PanelError> {
        let as_of = self.lock().mutations;
        let nodes = self.api.list_nodes().await.inspect_err(|e| {
            tracing::warn!(error = %e, "node listing failed");
        })?;
        tracing::debug!(count = nodes.len(), "node listing applied");
        self.apply(DirectoryEvent::NodesLoaded {
            nodes: nodes.clone(),
            as_of,
        });
        Ok(nodes)
    }

    // --- node commands ---

    pub async fn add_node(&self, form: &NodeForm) -> Result<Node, PanelError> {
        if let Some(id) = form.id {
            return Err(PanelError::Precondition(format!(
                "node {} already exists; update it instead",
                id
            )));
        }
        let checked = check_node_form(form).map_err(PanelError::Validation)?;

        let _guard = self.acquire(BusyKey::Create)?;
        let node = self
            .api
            .create_node(&checked.into_new())
            .await
            .inspect_err(|e| tracing::warn!(error = %e, action = "add", "node request failed"))?;

        tracing::info!(node_id = node.id, name = %node.name, "node added");
        self.apply(DirectoryEvent::NodeAdded { node: node.clone() });
        Ok(node)
    }

    pub async fn update_node(&self, form: &NodeForm) -> Result<Node, PanelError> {
        let id = form.id.ok_or_else(|| {
            PanelError::Precondition("cannot update a node that has not been created".into())
        })?;
        let checked = check_node_form(form).map_err(PanelError::Validation)?;

        let _guard = self.acquire(BusyKey::Node(id))?;
        match self.api.update_node(id, &checked.into_changes()).await {
            Ok(node) => {
                tracing::info!(node_id = id, name = %node.name, "node updated");
                self.apply(DirectoryEvent::NodeUpdated { node: node.clone() });
                Ok(node)
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(node_id = id, "node vanished before update, dropping from cache");
                self.apply(DirectoryEvent::NodeRemoved { id });
                Err(e)
            }
            Err(e) => {
                tracing::warn!(node_id = id, error = %e, action = "update", "node request failed");
                Err(e)
            }
        }
    }

    /// First step of a delete: record the intent
    pub fn mark_for_deletion(&self, id: NodeId) -> Result<(), PanelError> {
        if !self.lock().contains(id) {
            return Err(PanelError::NotFound(format!("node {}", id)));
        }
        self.apply(DirectoryEvent::SelectionChanged {
            selection: Selection::Deleting(id),
        });
        Ok(())
    }

    /// Second step of a delete: only issues the request for a node that
    /// was marked first
    pub async fn delete_node(&self, id: NodeId) -> Result<DeleteOutcome, PanelError> {
        {
            let state = self.lock();
            if state.removed.contains(&id) {
                tracing::debug!(node_id = id, "node already deleted in this session");
                return Ok(DeleteOutcome::AlreadyGone);
            }
            if state.selection != Selection::Deleting(id) {
                return Err(PanelError::NotConfirmed(id));
            }
        }

        let _guard = self.acquire(BusyKey::Node(id))?;
        let outcome = match self.api.delete_node(id).await {
            Ok(()) => DeleteOutcome::Deleted,
            Err(e) if e.is_not_found() => DeleteOutcome::AlreadyGone,
            Err(e) => {
                tracing::warn!(node_id = id, error = %e, action = "delete", "node request failed");
                return Err(e);
            }
        };

        tracing::info!(node_id = id, ?outcome, "node deleted");
        self.apply(DirectoryEvent::NodeRemoved { id });
        Ok(outcome)
    }

    /// Delete whichever node is currently marked
    pub async fn confirm_deletion(&self) -> Result<DeleteOutcome, PanelError> {
        match self.selection() {
            Selection::Deleting(id) => self.delete_node(id).await,
            _ => Err(PanelError::Precondition("no node is marked for deletion".into())),
        }
    }

    /// Ask the backend to reconnect a node in `error`.
    ///
    /// The cached status is not touched; the next listing shows whatever
    /// the backend reports.
    pub async fn reconnect_node(&self, node: &Node) -> Result<(), PanelError> {
        let current = self.node(node.id).unwrap_or_else(|| node.clone());
        if !project_status(&current).reconnectable {
            return Err(PanelError::Precondition(format!(
                "node {} is {}; only nodes in error can be reconnected",
                current.id, current.status
            )));
        }

        let _guard = self.acquire(BusyKey::Node(node.id))?;
        match self.api.reconnect_node(node.id).await {
            Ok(()) => {
                tracing::info!(node_id = node.id, "reconnect requested");
                self.apply(DirectoryEvent::ReconnectRequested { id: node.id });
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                self.apply(DirectoryEvent::NodeRemoved { id: node.id });
                Err(e)
            }
            Err(e) => {
                tracing::warn!(node_id = node.id, error = %e, action = "reconnect", "node request failed");
                Err(e)
            }
        }
    }

    // --- selection ---

    pub fn begin_edit(&self, id: NodeId) -> Result<Node, PanelError> {
        let node = self
            .node(id)
            .ok_or_else(|| PanelError::NotFound(format!("node {}", id)))?;
        self.apply(DirectoryEvent::SelectionChanged {
            selection: Selection::Editing(id),
        });
        Ok(node)
    }

    pub fn clear_selection(&self) {
        if self.selection() != Selection::None {
            self.apply(DirectoryEvent::SelectionChanged {
                selection: Selection::None,
            });
        }
    }

    // --- bindings ---

    /// Re-read one node's bindings; other nodes' lists are untouched
    pub async fn refresh_bindings(&self, node_id: NodeId) -> Result<Vec<ServiceBinding>, PanelError> {
        match self.api.list_services(node_id).await {
            Ok(bindings) => {
                self.apply(DirectoryEvent::BindingsLoaded {
                    node_id,
                    bindings: bindings.clone(),
                });
                Ok(bindings)
            }
            Err(e) if e.is_not_found() => {
                self.apply(DirectoryEvent::NodeRemoved { id: node_id });
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
