use async_trait::async_trait;

use crate::error::PanelError;
use crate::model::{
    BindingDraft, BindingPatch, NewNode, Node, NodeChanges, NodeId, ServiceBinding, ServiceId,
};

/// The panel backend, seen as typed request functions.
///
/// Implementations map requests and responses and nothing else: no
/// caching and no retries.
///
/// - `HttpPanelApi`: JSON over HTTPS against the real backend
/// - `MemoryApi`: in-process backend for demos and tests
#[async_trait]
pub trait PanelApi: Send + Sync {
    /// `GET /nodes`
    async fn list_nodes(&self) -> Result<Vec<Node>, PanelError>;

    /// `POST /nodes`
    async fn create_node(&self, node: &NewNode) -> Result<Node, PanelError>;

    /// `PUT /nodes/{id}`
    async fn update_node(&self, id: NodeId, changes: &NodeChanges) -> Result<Node, PanelError>;

    /// `DELETE /nodes/{id}`
    async fn delete_node(&self, id: NodeId) -> Result<(), PanelError>;

    /// `POST /nodes/{id}/reconnect`; acknowledgement only
    async fn reconnect_node(&self, id: NodeId) -> Result<(), PanelError>;

    /// `GET /nodes/{id}/services`
    async fn list_services(&self, node_id: NodeId) -> Result<Vec<ServiceBinding>, PanelError>;

    /// `POST /nodes/{id}/services`
    async fn create_service(
        &self,
        node_id: NodeId,
        draft: &BindingDraft,
    ) -> Result<ServiceBinding, PanelError>;

    /// `PUT /nodes/{id}/services/{serviceId}`
    async fn update_service(
        &self,
        node_id: NodeId,
        service_id: ServiceId,
        patch: &BindingPatch,
    ) -> Result<ServiceBinding, PanelError>;

    /// `DELETE /nodes/{id}/services/{serviceId}`
    async fn delete_service(&self, node_id: NodeId, service_id: ServiceId)
    -> Result<(), PanelError>;

    /// Name of this implementation
    fn name(&self) -> &'static str;
}
