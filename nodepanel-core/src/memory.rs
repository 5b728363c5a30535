//! In-process backend used by `--demo` mode and by tests.
//!
//! Behaves like the panel backend at its JSON contract: assigns ids,
//! starts nodes in `connecting`, answers 404 for unknown ids, rejects a
//! second binding of the same protocol, and drops a node's bindings
//! together with the node.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;

use crate::api::PanelApi;
use crate::error::{Field, PanelError};
use crate::model::{
    BindingDraft, BindingPatch, NewNode, Node, NodeChanges, NodeId, NodeStatus, ServiceBinding,
    ServiceId,
};

/// Failure to return from the next request instead of serving it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Injected {
    Network,
    Authorization,
    NotFound,
    Conflict { field: Option<Field> },
    Server(u16),
}

impl Injected {
    fn into_error(self) -> PanelError {
        match self {
            Injected::Network => PanelError::Network("connection reset".into()),
            Injected::Authorization => PanelError::Authorization("token expired".into()),
            Injected::NotFound => PanelError::NotFound("resource".into()),
            Injected::Conflict { field } => PanelError::Conflict {
                message: "rejected by backend".into(),
                field,
            },
            Injected::Server(status) => PanelError::Server {
                status,
                message: "internal error".into(),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Backend {
    next_node_id: NodeId,
    next_service_id: ServiceId,
    nodes: Vec<Node>,
    services: BTreeMap<NodeId, Vec<ServiceBinding>>,
    failures: VecDeque<Injected>,
}

pub struct MemoryApi {
    backend: Mutex<Backend>,
    requests: AtomicU64,
    latency: Duration,
    auto_progress: bool,
    reuse_ids: bool,
}

impl MemoryApi {
    pub fn new() -> Self {
        Self {
            backend: Mutex::new(Backend {
                next_node_id: 1,
                next_service_id: 1,
                ..Backend::default()
            }),
            requests: AtomicU64::new(0),
            latency: Duration::ZERO,
            auto_progress: false,
            reuse_ids: false,
        }
    }

    /// Delay every response by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Move `connecting` nodes to `active` on each node listing, the way
    /// a healthy backend settles after a handshake
    pub fn with_auto_progress(mut self, enabled: bool) -> Self {
        self.auto_progress = enabled;
        self
    }

    /// Hand out `max(id) + 1` for new nodes, so the id of a deleted
    /// last node comes back, as SQLite rowids do
    pub fn with_reused_ids(mut self, enabled: bool) -> Self {
        self.reuse_ids = enabled;
        self
    }

    /// Number of requests served or failed so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, failure: Injected) {
        self.lock().failures.push_back(failure);
    }

    /// Insert a node directly, bypassing the request path
    pub fn seed_node(&self, name: &str, address: &str, status: NodeStatus) -> Node {
        let mut backend = self.lock();
        let node = Node {
            id: backend.next_node_id,
            name: name.to_string(),
            address: address.to_string(),
            port: None,
            status,
            xray_version: Some("1.8.24".into()),
            connection: None,
            last_seen: unix_now(),
            message: None,
        };
        backend.next_node_id += 1;
        backend.nodes.push(node.clone());
        node
    }

    /// Change a node's status the way the backend would on its own
    pub fn set_status(&self, id: NodeId, status: NodeStatus) {
        let mut backend = self.lock();
        if let Some(node) = backend.nodes.iter_mut().find(|n| n.id == id) {
            node.status = status;
            node.message = match status {
                NodeStatus::Error => Some("handshake failed".into()),
                _ => None,
            };
        }
    }

    /// Current backend-side status, regardless of any client cache
    pub fn status_of(&self, id: NodeId) -> Option<NodeStatus> {
        self.lock().nodes.iter().find(|n| n.id == id).map(|n| n.status)
    }

    fn lock(&self) -> MutexGuard<'_, Backend> {
        self.backend.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn begin(&self) -> Result<MutexGuard<'_, Backend>, PanelError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut backend = self.lock();
        let failure = backend.failures.pop_front();
        match failure {
            Some(failure) => Err(failure.into_error()),
            None => Ok(backend),
        }
    }
}

impl Default for MemoryApi {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> Option<u64> {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}

fn node_not_found(id: NodeId) -> PanelError {
    PanelError::NotFound(format!("node {}", id))
}

#[async_trait]
impl PanelApi for MemoryApi {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, PanelError> {
        let mut backend = self.begin().await?;
        if self.auto_progress {
            for node in backend.nodes.iter_mut() {
                if node.status == NodeStatus::Connecting {
                    node.status = NodeStatus::Active;
                    node.last_seen = unix_now();
                }
            }
        }
        Ok(backend.nodes.clone())
    }

    async fn create_node(&self, new: &NewNode) -> Result<Node, PanelError> {
        let mut backend = self.begin().await?;
        if backend.nodes.iter().any(|n| n.name == new.name) {
            return Err(PanelError::Conflict {
                message: format!("a node named '{}' already exists", new.name),
                field: Some(Field::Name),
            });
        }
        let id = if self.reuse_ids {
            backend.nodes.iter().map(|n| n.id).max().unwrap_or(0) + 1
        } else {
            backend.next_node_id
        };
        let node = Node {
            id,
            name: new.name.clone(),
            address: new.address.clone(),
            port: new.port,
            status: NodeStatus::Connecting,
            xray_version: None,
            connection: None,
            last_seen: None,
            message: None,
        };
        backend.next_node_id = backend.next_node_id.max(id) + 1;
        backend.nodes.push(node.clone());
        Ok(node)
    }

    async fn update_node(&self, id: NodeId, changes: &NodeChanges) -> Result<Node, PanelError> {
        let mut backend = self.begin().await?;
        let node = backend
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| node_not_found(id))?;
        node.name = changes.name.clone();
        node.address = changes.address.clone();
        node.port = changes.port;
        Ok(node.clone())
    }

    async fn delete_node(&self, id: NodeId) -> Result<(), PanelError> {
        let mut backend = self.begin().await?;
        let before = backend.nodes.len();
        backend.nodes.retain(|n| n.id != id);
        if backend.nodes.len() == before {
            return Err(node_not_found(id));
        }
        backend.services.remove(&id);
        Ok(())
    }

    async fn reconnect_node(&self, id: NodeId) -> Result<(), PanelError> {
        let mut backend = self.begin().await?;
        let node = backend
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| node_not_found(id))?;
        node.status = NodeStatus::Connecting;
        node.message = None;
        Ok(())
    }

    async fn list_services(&self, node_id: NodeId) -> Result<Vec<ServiceBinding>, PanelError> {
        let backend = self.begin().await?;
        if !backend.nodes.iter().any(|n| n.id == node_id) {
            return Err(node_not_found(node_id));
        }
        Ok(backend.services.get(&node_id).cloned().unwrap_or_default())
    }

    async fn create_service(
        &self,
        node_id: NodeId,
        draft: &BindingDraft,
    ) -> Result<ServiceBinding, PanelError> {
        let mut backend = self.begin().await?;
        if !backend.nodes.iter().any(|n| n.id == node_id) {
            return Err(node_not_found(node_id));
        }
        let id = backend.next_service_id;
        let bindings = backend.services.entry(node_id).or_default();
        if bindings.iter().any(|b| b.protocol() == draft.protocol()) {
            return Err(PanelError::Conflict {
                message: format!("{} is already configured on node {}", draft.protocol(), node_id),
                field: Some(Field::Protocol),
            });
        }
        let binding = ServiceBinding {
            id,
            node_id,
            settings: draft.settings.clone(),
            port: draft.port,
            remark: draft.remark.clone(),
        };
        bindings.push(binding.clone());
        backend.next_service_id += 1;
        Ok(binding)
    }

    async fn update_service(
        &self,
        node_id: NodeId,
        service_id: ServiceId,
        patch: &BindingPatch,
    ) -> Result<ServiceBinding, PanelError> {
        let mut backend = self.begin().await?;
        let binding = backend
            .services
            .get_mut(&node_id)
            .and_then(|list| list.iter_mut().find(|b| b.id == service_id))
            .ok_or_else(|| PanelError::NotFound(format!("service {}", service_id)))?;
        if binding.protocol() != patch.settings.protocol() {
            return Err(PanelError::Conflict {
                message: "protocol cannot be changed".into(),
                field: Some(Field::Protocol),
            });
        }
        binding.settings = patch.settings.clone();
        binding.port = patch.port;
        binding.remark = patch.remark.clone();
        Ok(binding.clone())
    }

    async fn delete_service(
        &self,
        node_id: NodeId,
        service_id: ServiceId,
    ) -> Result<(), PanelError> {
        let mut backend = self.begin().await?;
        let list = backend
            .services
            .get_mut(&node_id)
            .ok_or_else(|| PanelError::NotFound(format!("service {}", service_id)))?;
        let before = list.len();
        list.retain(|b| b.id != service_id);
        if list.len() == before {
            return Err(PanelError::NotFound(format!("service {}", service_id)));
        }
        Ok(())
    }
}
