//! Editing the protocol services bound to one persisted node.

use std::sync::Arc;

use crate::error::{PanelError, ValidationError};
use crate::model::{BindingDraft, BindingPatch, NodeId, ServiceBinding, ServiceId};
use crate::state::BusyKey;
use crate::store::NodeDirectory;
use crate::validate::{check_port, check_settings};

/// Binding list editor scoped to a single node.
///
/// Can only be opened for a node the directory already holds, so a node
/// that has not been created yet can never own bindings.
pub struct BindingEditor {
    directory: Arc<NodeDirectory>,
    node_id: NodeId,
    pending_removal: Option<ServiceId>,
}

impl BindingEditor {
    pub fn open(directory: Arc<NodeDirectory>, node_id: NodeId) -> Result<Self, PanelError> {
        if directory.node(node_id).is_none() {
            return Err(PanelError::Precondition(format!(
                "node {} is not in the directory; save it before adding services",
                node_id
            )));
        }
        Ok(Self {
            directory,
            node_id,
            pending_removal: None,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Bindings as last fetched, without a request
    pub fn cached(&self) -> Vec<ServiceBinding> {
        self.directory.bindings(self.node_id).unwrap_or_default()
    }

    pub fn pending_removal(&self) -> Option<ServiceId> {
        self.pending_removal
    }

    pub async fn list(&self) -> Result<Vec<ServiceBinding>, PanelError> {
        self.directory.refresh_bindings(self.node_id).await
    }

    /// Current list, fetching it only if it was never loaded
    async fn current(&self) -> Result<Vec<ServiceBinding>, PanelError> {
        match self.directory.bindings(self.node_id) {
            Some(bindings) => Ok(bindings),
            None => self.list().await,
        }
    }

    pub async fn add(&self, draft: &BindingDraft) -> Result<ServiceBinding, PanelError> {
        let mut errors = check_settings(&draft.settings);
        if let Err(e) = check_port(draft.port) {
            errors.push(e);
        }
        errors.into_result()?;

        let existing = self.current().await?;
        if existing.iter().any(|b| b.protocol() == draft.protocol()) {
            tracing::debug!(node_id = self.node_id, protocol = %draft.protocol(), "duplicate protocol rejected locally");
            return Err(ValidationError::DuplicateProtocol {
                protocol: draft.protocol(),
            }
            .into());
        }

        let _guard = self.directory.acquire(BusyKey::Bindings(self.node_id))?;
        let binding = self
            .directory
            .api()
            .create_service(self.node_id, draft)
            .await
            .inspect_err(|e| {
                tracing::warn!(node_id = self.node_id, error = %e, action = "add service", "service request failed")
            })?;
        tracing::info!(node_id = self.node_id, service_id = binding.id, protocol = %binding.protocol(), "service added");

        self.refresh_after_mutation().await;
        Ok(binding)
    }

    pub async fn update(
        &self,
        service_id: ServiceId,
        patch: &BindingPatch,
    ) -> Result<ServiceBinding, PanelError> {
        let existing = self.current().await?;
        let Some(binding) = existing.iter().find(|b| b.id == service_id) else {
            return Err(PanelError::NotFound(format!("service {}", service_id)));
        };
        if binding.protocol() != patch.settings.protocol() {
            return Err(ValidationError::ProtocolImmutable {
                existing: binding.protocol(),
                requested: patch.settings.protocol(),
            }
            .into());
        }
        let mut errors = check_settings(&patch.settings);
        if let Err(e) = check_port(patch.port) {
            errors.push(e);
        }
        errors.into_result()?;

        let _guard = self.directory.acquire(BusyKey::Bindings(self.node_id))?;
        let result = self
            .directory
            .api()
            .update_service(self.node_id, service_id, patch)
            .await;
        match result {
            Ok(updated) => {
                tracing::info!(node_id = self.node_id, service_id, "service updated");
                self.refresh_after_mutation().await;
                Ok(updated)
            }
            Err(e) => {
                tracing::warn!(node_id = self.node_id, service_id, error = %e, action = "update service", "service request failed");
                if e.is_not_found() {
                    self.refresh_after_mutation().await;
                }
                Err(e)
            }
        }
    }

    /// First step of a removal
    pub fn mark_for_removal(&mut self, service_id: ServiceId) {
        self.pending_removal = Some(service_id);
    }

    /// Second step: removes the binding marked with `mark_for_removal`
    pub async fn remove(&mut self, service_id: ServiceId) -> Result<(), PanelError> {
        if self.pending_removal != Some(service_id) {
            return Err(PanelError::Precondition(format!(
                "service {} has not been confirmed for removal",
                service_id
            )));
        }

        let guard = self.directory.acquire(BusyKey::Bindings(self.node_id))?;
        let result = self
            .directory
            .api()
            .delete_service(self.node_id, service_id)
            .await;
        drop(guard);
        match result {
            Ok(()) => tracing::info!(node_id = self.node_id, service_id, "service removed"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(node_id = self.node_id, service_id, "service already gone")
            }
            Err(e) => {
                tracing::warn!(node_id = self.node_id, service_id, error = %e, action = "remove service", "service request failed");
                return Err(e);
            }
        }

        self.pending_removal = None;
        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Refresh this node's list only. The mutation already succeeded, so
    /// a failed refresh is logged rather than reported as its failure.
    async fn refresh_after_mutation(&self) {
        if let Err(e) = self.list().await {
            tracing::warn!(node_id = self.node_id, error = %e, "service list refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Field;
    use crate::memory::{Injected, MemoryApi};
    use crate::model::{NodeStatus, Protocol, ProtocolSettings};

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    fn vless() -> BindingDraft {
        BindingDraft::new(ProtocolSettings::Vless {
            id: UUID.into(),
            flow: Some("xtls-rprx-vision".into()),
        })
        .with_port(443)
    }

    async fn setup() -> (Arc<MemoryApi>, Arc<NodeDirectory>, NodeId) {
        let api = Arc::new(MemoryApi::new());
        let dir = Arc::new(NodeDirectory::new(api.clone()));
        let node = api.seed_node("eu-1", "1.2.3.4", NodeStatus::Active);
        dir.list_nodes().await.unwrap();
        (api, dir, node.id)
    }

    #[tokio::test]
    async fn test_open_requires_persisted_node() {
        let (_api, dir, _) = setup().await;
        assert!(matches!(
            BindingEditor::open(dir, 999),
            Err(PanelError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_protocol_rejected_without_request() {
        let (api, dir, node_id) = setup().await;
        let editor = BindingEditor::open(dir.clone(), node_id).unwrap();
        editor.add(&vless()).await.unwrap();
        let requests = api.request_count();

        let err = editor.add(&vless()).await.unwrap_err();
        match err {
            PanelError::Validation(errors) => assert!(matches!(
                errors.for_field(Field::Protocol),
                Some(ValidationError::DuplicateProtocol {
                    protocol: Protocol::Vless
                })
            )),
            other => panic!("expected duplicate protocol, got {:?}", other),
        }
        assert_eq!(api.request_count(), requests);
        assert_eq!(editor.cached().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_locally() {
        let (api, dir, node_id) = setup().await;
        let editor = BindingEditor::open(dir, node_id).unwrap();
        let requests = api.request_count();
        let draft = BindingDraft::new(ProtocolSettings::Trojan {
            password: String::new(),
        });
        assert!(matches!(
            editor.add(&draft).await,
            Err(PanelError::Validation(_))
        ));
        assert_eq!(api.request_count(), requests);
    }

    #[tokio::test]
    async fn test_update_cannot_change_protocol() {
        let (api, dir, node_id) = setup().await;
        let editor = BindingEditor::open(dir, node_id).unwrap();
        let binding = editor.add(&vless()).await.unwrap();
        let requests = api.request_count();

        let patch = BindingPatch::new(ProtocolSettings::Trojan {
            password: "pw".into(),
        });
        let err = editor.update(binding.id, &patch).await.unwrap_err();
        assert!(matches!(err, PanelError::Validation(_)));
        assert_eq!(api.request_count(), requests);

        let patch = BindingPatch::new(ProtocolSettings::Vless {
            id: UUID.into(),
            flow: None,
        });
        let updated = editor.update(binding.id, &patch).await.unwrap();
        assert_eq!(updated.settings, patch.settings);
        assert_eq!(editor.cached()[0].settings, patch.settings);
    }

    #[tokio::test]
    async fn test_remove_is_two_step_and_tolerates_404() {
        let (api, dir, node_id) = setup().await;
        let mut editor = BindingEditor::open(dir, node_id).unwrap();
        let binding = editor.add(&vless()).await.unwrap();

        assert!(matches!(
            editor.remove(binding.id).await,
            Err(PanelError::Precondition(_))
        ));
        assert_eq!(editor.cached().len(), 1);

        editor.mark_for_removal(binding.id);
        editor.remove(binding.id).await.unwrap();
        assert!(editor.cached().is_empty());
        assert_eq!(editor.pending_removal(), None);

        editor.mark_for_removal(binding.id);
        api.fail_next(Injected::NotFound);
        editor.remove(binding.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_touches_only_one_node() {
        let (api, dir, node_id) = setup().await;
        let other = api.seed_node("us-1", "5.6.7.8", NodeStatus::Active);
        dir.refresh().await.unwrap();

        let other_editor = BindingEditor::open(dir.clone(), other.id).unwrap();
        other_editor.list().await.unwrap();
        let editor = BindingEditor::open(dir.clone(), node_id).unwrap();
        editor.add(&vless()).await.unwrap();

        assert_eq!(dir.bindings(node_id).unwrap().len(), 1);
        assert!(dir.bindings(other.id).unwrap().is_empty());
    }
}
