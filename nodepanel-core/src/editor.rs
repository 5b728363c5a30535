//! The create/edit dialog for a node.
//!
//! ```text
//!  Closed ──open_create──▶ Creating ──┐
//!    ▲                                 ├── close / successful submit ──▶ Closed
//!    └────────open_edit──▶ Editing ───┘
//! ```
//!
//! Basic settings must be persisted before services can be attached, so
//! the services tab only exists in `Editing`.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::bindings::BindingEditor;
use crate::error::{Field, Notice, PanelError, ValidationErrors};
use crate::model::{Node, NodeForm, NodeId, Selection};
use crate::store::NodeDirectory;
use crate::validate::check_node_form;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tab {
    Basic,
    Services,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditorMode {
    Closed,
    Creating,
    Editing(Node),
}

/// Result of a submission as seen by the dialog
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Saved; the dialog closed
    Saved(Node),
    /// Saved after the dialog had already been closed. The directory
    /// applied the result; the dialog stays closed.
    SavedInBackground(Node),
    /// Failed; the dialog is still open with the entered data, and the
    /// errors are available from `field_error` and `notice`
    Rejected(PanelError),
    /// Failed after the dialog had been closed
    FailedInBackground(Notice),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubmitKind {
    Create,
    Update(NodeId),
}

/// An issued save, detached from the dialog so it can outlive it
pub struct Submission {
    directory: Arc<NodeDirectory>,
    kind: SubmitKind,
    form: NodeForm,
    session: u64,
    action: String,
}

/// What a `Submission` produced, to be handed back to `NodeEditor::finish`
#[derive(Debug)]
pub struct SubmissionResult {
    session: u64,
    action: String,
    result: Result<Node, PanelError>,
}

impl Submission {
    pub async fn run(self) -> SubmissionResult {
        let result = match self.kind {
            SubmitKind::Create => self.directory.add_node(&self.form).await,
            SubmitKind::Update(_) => self.directory.update_node(&self.form).await,
        };
        SubmissionResult {
            session: self.session,
            action: self.action,
            result,
        }
    }
}

pub struct NodeEditor {
    directory: Arc<NodeDirectory>,
    mode: EditorMode,
    form: NodeForm,
    tab: Tab,
    field_errors: BTreeMap<Field, String>,
    notice: Option<Notice>,
    /// Bumped every time the dialog opens or closes
    session: u64,
    submitting: bool,
}

impl NodeEditor {
    pub fn new(directory: Arc<NodeDirectory>) -> Self {
        Self {
            directory,
            mode: EditorMode::Closed,
            form: NodeForm::default(),
            tab: Tab::Basic,
            field_errors: BTreeMap::new(),
            notice: None,
            session: 0,
            submitting: false,
        }
    }

    pub fn mode(&self) -> &EditorMode {
        &self.mode
    }

    pub fn is_open(&self) -> bool {
        self.mode != EditorMode::Closed
    }

    /// The save control is disabled while this is true
    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn form(&self) -> &NodeForm {
        &self.form
    }

    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn field_error(&self, field: Field) -> Option<&str> {
        self.field_errors.get(&field).map(String::as_str)
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    fn reset(&mut self, mode: EditorMode, form: NodeForm) {
        self.session += 1;
        self.mode = mode;
        self.form = form;
        self.tab = Tab::Basic;
        self.field_errors.clear();
        self.notice = None;
        self.submitting = false;
    }

    pub fn open_create(&mut self) {
        self.reset(EditorMode::Creating, NodeForm::default());
    }

    pub fn open_edit(&mut self, id: NodeId) -> Result<(), PanelError> {
        let node = self.directory.begin_edit(id)?;
        let form = NodeForm::from_node(&node);
        self.reset(EditorMode::Editing(node), form);
        Ok(())
    }

    /// Cancel or dismiss. An in-flight submission keeps running.
    pub fn close(&mut self) {
        if let EditorMode::Editing(node) = &self.mode {
            if self.directory.selection() == Selection::Editing(node.id) {
                self.directory.clear_selection();
            }
        }
        self.reset(EditorMode::Closed, NodeForm::default());
    }

    pub fn visible_tabs(&self) -> &'static [Tab] {
        match self.mode {
            EditorMode::Closed => &[],
            EditorMode::Creating => &[Tab::Basic],
            EditorMode::Editing(_) => &[Tab::Basic, Tab::Services],
        }
    }

    pub fn select_tab(&mut self, tab: Tab) -> Result<(), PanelError> {
        if !self.visible_tabs().contains(&tab) {
            return Err(PanelError::Precondition(
                "services can only be configured after the node has been saved".into(),
            ));
        }
        self.tab = tab;
        Ok(())
    }

    /// Binding editor for the node being edited
    pub fn services(&self) -> Result<BindingEditor, PanelError> {
        match &self.mode {
            EditorMode::Editing(node) => BindingEditor::open(self.directory.clone(), node.id),
            _ => Err(PanelError::Precondition(
                "services can only be configured after the node has been saved".into(),
            )),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.form.name = name.into();
        self.field_errors.remove(&Field::Name);
    }

    pub fn set_address(&mut self, address: impl Into<String>) {
        self.form.address = address.into();
        self.field_errors.remove(&Field::Address);
    }

    pub fn set_port(&mut self, port: impl Into<String>) {
        self.form.port = port.into();
        self.field_errors.remove(&Field::Port);
    }

    fn record_validation(&mut self, errors: &ValidationErrors) {
        for e in errors.iter() {
            self.field_errors.entry(e.field()).or_insert_with(|| e.to_string());
        }
    }

    /// Check the form locally, recording per-field errors
    pub fn validate(&mut self) -> Result<(), ValidationErrors> {
        self.field_errors.clear();
        match check_node_form(&self.form) {
            Ok(_) => Ok(()),
            Err(errors) => {
                self.record_validation(&errors);
                Err(errors)
            }
        }
    }

    /// Validate and detach a save request. The save control should stay
    /// disabled until the matching `finish`.
    pub fn begin_submit(&mut self) -> Result<Submission, PanelError> {
        let (kind, action) = match &self.mode {
            EditorMode::Closed => {
                return Err(PanelError::Precondition("the editor is not open".into()));
            }
            EditorMode::Creating => (SubmitKind::Create, "Add node".to_string()),
            EditorMode::Editing(node) => {
                (SubmitKind::Update(node.id), format!("Update node {}", node.name))
            }
        };
        if self.submitting {
            return Err(PanelError::Busy(action));
        }
        self.notice = None;
        self.validate().map_err(PanelError::Validation)?;

        let mut form = self.form.clone();
        form.id = match kind {
            SubmitKind::Create => None,
            SubmitKind::Update(id) => Some(id),
        };
        self.submitting = true;
        Ok(Submission {
            directory: self.directory.clone(),
            kind,
            form,
            session: self.session,
            action,
        })
    }

    /// Apply a finished submission to the dialog
    pub fn finish(&mut self, done: SubmissionResult) -> SubmitOutcome {
        if done.session != self.session {
            return match done.result {
                Ok(node) => {
                    tracing::debug!(node_id = node.id, "save finished after editor closed");
                    SubmitOutcome::SavedInBackground(node)
                }
                Err(e) => SubmitOutcome::FailedInBackground(e.notice(&done.action)),
            };
        }

        self.submitting = false;
        match done.result {
            Ok(node) => {
                self.close();
                SubmitOutcome::Saved(node)
            }
            Err(e) => {
                match &e {
                    PanelError::Validation(errors) => self.record_validation(errors),
                    PanelError::Conflict {
                        message,
                        field: Some(field),
                    } if field.on_node_form() => {
                        self.field_errors.insert(*field, message.clone());
                    }
                    _ => self.notice = Some(e.notice(&done.action)),
                }
                SubmitOutcome::Rejected(e)
            }
        }
    }

    /// Validate, save and apply the outcome in one call
    pub async fn submit(&mut self) -> SubmitOutcome {
        match self.begin_submit() {
            Ok(submission) => {
                let done = submission.run().await;
                self.finish(done)
            }
            Err(e) => {
                if !matches!(e, PanelError::Validation(_)) {
                    self.notice = Some(e.notice("Save node"));
                }
                SubmitOutcome::Rejected(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::memory::{Injected, MemoryApi};
    use crate::model::{BindingDraft, NodeStatus, ProtocolSettings};
    use crate::store::DeleteOutcome;
    use std::time::Duration;

    fn setup() -> (Arc<MemoryApi>, Arc<NodeDirectory>, NodeEditor) {
        let api = Arc::new(MemoryApi::new());
        let dir = Arc::new(NodeDirectory::new(api.clone()));
        let editor = NodeEditor::new(dir.clone());
        (api, dir, editor)
    }

    #[tokio::test]
    async fn test_services_tab_hidden_while_creating() {
        let (_api, _dir, mut editor) = setup();
        assert!(editor.visible_tabs().is_empty());

        editor.open_create();
        assert_eq!(editor.visible_tabs(), &[Tab::Basic]);
        assert!(editor.form().id.is_none());
        assert!(editor.select_tab(Tab::Services).is_err());
        assert!(editor.services().is_err());
        assert_eq!(editor.tab(), Tab::Basic);
    }

    #[tokio::test]
    async fn test_services_tab_visible_when_editing() {
        let (api, dir, mut editor) = setup();
        let node = api.seed_node("eu-1", "1.2.3.4", NodeStatus::Active);
        dir.list_nodes().await.unwrap();

        editor.open_edit(node.id).unwrap();
        assert_eq!(dir.selection(), Selection::Editing(node.id));
        assert_eq!(editor.visible_tabs(), &[Tab::Basic, Tab::Services]);
        editor.select_tab(Tab::Services).unwrap();
        assert_eq!(editor.services().unwrap().node_id(), node.id);

        editor.close();
        assert_eq!(dir.selection(), Selection::None);
        assert!(!editor.is_open());
    }

    #[tokio::test]
    async fn test_invalid_form_stays_open_without_request() {
        let (api, _dir, mut editor) = setup();
        editor.open_create();
        editor.set_address("1.2.3.4");

        let outcome = editor.submit().await;
        assert!(matches!(outcome, SubmitOutcome::Rejected(PanelError::Validation(_))));
        assert!(editor.is_open());
        assert!(editor.field_error(Field::Name).is_some());
        assert_eq!(editor.form().address, "1.2.3.4");
        assert_eq!(api.request_count(), 0);
    }

    #[tokio::test]
    async fn test_server_conflict_maps_to_field() {
        let (api, _dir, mut editor) = setup();
        editor.open_create();
        editor.set_name("eu-1");
        editor.set_address("1.2.3.4");
        api.fail_next(Injected::Conflict {
            field: Some(Field::Name),
        });

        let outcome = editor.submit().await;
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
        assert!(editor.field_error(Field::Name).is_some());
        assert!(editor.notice().is_none());
        assert!(!editor.is_submitting());
    }

    #[tokio::test]
    async fn test_conflict_on_unshown_field_becomes_notice() {
        let (api, _dir, mut editor) = setup();
        editor.open_create();
        editor.set_name("eu-1");
        editor.set_address("1.2.3.4");
        api.fail_next(Injected::Conflict {
            field: Some(Field::Protocol),
        });

        let outcome = editor.submit().await;
        assert!(matches!(outcome, SubmitOutcome::Rejected(_)));
        assert!(editor.field_error(Field::Protocol).is_none());
        assert!(Field::NODE_FORM.iter().all(|f| editor.field_error(*f).is_none()));
        let notice = editor.notice().expect("general notice");
        assert!(notice.message.contains("rejected by backend"));
        assert!(editor.is_open());
    }

    #[tokio::test]
    async fn test_network_failure_keeps_input_and_notifies() {
        let (api, dir, mut editor) = setup();
        editor.open_create();
        editor.set_name("eu-1");
        editor.set_address("1.2.3.4");
        api.fail_next(Injected::Network);

        editor.submit().await;
        assert!(editor.is_open());
        assert_eq!(editor.form().name, "eu-1");
        let notice = editor.notice().unwrap();
        assert_eq!(notice.action, "Add node");
        assert!(dir.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_double_submit_is_refused() {
        let (api, _dir, mut editor) = setup();
        editor.open_create();
        editor.set_name("eu-1");
        editor.set_address("1.2.3.4");

        let first = editor.begin_submit().unwrap();
        assert!(editor.is_submitting());
        assert!(matches!(editor.begin_submit(), Err(PanelError::Busy(_))));

        let done = first.run().await;
        assert!(matches!(editor.finish(done), SubmitOutcome::Saved(_)));
        assert_eq!(api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_close_during_submit_still_applies_result() {
        let api = Arc::new(MemoryApi::new().with_latency(Duration::from_millis(30)));
        let dir = Arc::new(NodeDirectory::new(api.clone()));
        let mut editor = NodeEditor::new(dir.clone());
        editor.open_create();
        editor.set_name("slow-1");
        editor.set_address("1.2.3.4");

        let submission = editor.begin_submit().unwrap();
        let handle = tokio::spawn(submission.run());
        editor.close();

        let done = handle.await.unwrap();
        let outcome = editor.finish(done);
        assert!(matches!(outcome, SubmitOutcome::SavedInBackground(_)));
        assert!(!editor.is_open());
        assert_eq!(dir.nodes().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_preserves_id() {
        let (api, dir, mut editor) = setup();
        let node = api.seed_node("eu-1", "1.2.3.4", NodeStatus::Error);
        dir.list_nodes().await.unwrap();

        editor.open_edit(node.id).unwrap();
        editor.set_name("eu-1-renamed");
        let saved = match editor.submit().await {
            SubmitOutcome::Saved(node) => node,
            other => panic!("expected save, got {:?}", other),
        };
        assert_eq!(saved.id, node.id);
        assert_eq!(saved.status, NodeStatus::Error);
        assert!(!editor.is_open());
    }

    #[tokio::test]
    async fn test_node_lifecycle_scenario() {
        let (_api, dir, mut editor) = setup();

        editor.open_create();
        editor.set_name("eu-1");
        editor.set_address("1.2.3.4");
        let SubmitOutcome::Saved(created) = editor.submit().await else {
            panic!("create failed");
        };
        let nodes = dir.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].status, NodeStatus::Connecting);

        editor.open_edit(created.id).unwrap();
        editor.set_name("eu-1-renamed");
        assert!(matches!(editor.submit().await, SubmitOutcome::Saved(_)));
        let nodes = dir.list_nodes().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, created.id);
        assert_eq!(nodes[0].name, "eu-1-renamed");
        assert_eq!(nodes[0].status, NodeStatus::Connecting);

        editor.open_edit(created.id).unwrap();
        editor.select_tab(Tab::Services).unwrap();
        let services = editor.services().unwrap();
        let vless = BindingDraft::new(ProtocolSettings::Vless {
            id: "b831381d-6324-4d53-ad4f-8cda48b30811".into(),
            flow: None,
        });
        services.add(&vless).await.unwrap();
        let err = services.add(&vless).await.unwrap_err();
        assert!(matches!(
            err,
            PanelError::Validation(ref errors)
                if matches!(errors.iter().next(), Some(ValidationError::DuplicateProtocol { .. }))
        ));
        assert_eq!(services.list().await.unwrap().len(), 1);
        editor.close();

        dir.mark_for_deletion(created.id).unwrap();
        assert_eq!(
            dir.delete_node(created.id).await.unwrap(),
            DeleteOutcome::Deleted
        );
        assert!(dir.list_nodes().await.unwrap().is_empty());
        assert!(dir.delete_node(created.id).await.is_ok());
    }
}
