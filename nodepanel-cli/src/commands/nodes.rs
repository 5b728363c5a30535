use std::time::SystemTime;

use anyhow::bail;
use clap::Subcommand;

use nodepanel_core::editor::{NodeEditor, SubmitOutcome};
use nodepanel_core::error::{Field, PanelError};
use nodepanel_core::model::{Node, NodeId};
use nodepanel_core::status::{StatusPolicy, project_status_at};
use nodepanel_core::store::{DeleteOutcome, NodeDirectory};

use super::{failure, Directory};

#[derive(Subcommand, Debug)]
pub enum NodesCommand {
    /// Show every node with its status
    List {
        /// Print the raw node records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Register a new node
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        port: Option<String>,
    },
    /// Change a node's basic settings
    Edit {
        id: NodeId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        address: Option<String>,
        /// New port; pass an empty string to clear it
        #[arg(long)]
        port: Option<String>,
    },
    /// Delete a node and all of its services
    Delete {
        id: NodeId,
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
    /// Ask the backend to reconnect a node in error
    Reconnect { id: NodeId },
}

pub async fn handle_nodes_command(
    directory: Directory,
    policy: &StatusPolicy,
    command: NodesCommand,
) -> anyhow::Result<()> {
    match command {
        NodesCommand::List { json } => handle_list(&directory, policy, json).await,
        NodesCommand::Add {
            name,
            address,
            port,
        } => {
            let mut editor = NodeEditor::new(directory);
            editor.open_create();
            editor.set_name(name);
            editor.set_address(address);
            if let Some(port) = port {
                editor.set_port(port);
            }
            let node = save(&mut editor).await?;
            println!("Node '{}' added with id {} ({})", node.name, node.id, node.status);
            Ok(())
        }
        NodesCommand::Edit {
            id,
            name,
            address,
            port,
        } => {
            directory.list_nodes().await.map_err(|e| failure(e, "List nodes"))?;
            let mut editor = NodeEditor::new(directory);
            editor
                .open_edit(id)
                .map_err(|e| failure(e, "Edit node"))?;
            if let Some(name) = name {
                editor.set_name(name);
            }
            if let Some(address) = address {
                editor.set_address(address);
            }
            if let Some(port) = port {
                editor.set_port(port);
            }
            let node = save(&mut editor).await?;
            println!("Node {} updated: {} at {}", node.id, node.name, endpoint(&node));
            Ok(())
        }
        NodesCommand::Delete { id, yes } => handle_delete(&directory, id, yes).await,
        NodesCommand::Reconnect { id } => {
            directory.list_nodes().await.map_err(|e| failure(e, "List nodes"))?;
            let Some(node) = directory.node(id) else {
                bail!("node {} does not exist", id);
            };
            directory
                .reconnect_node(&node)
                .await
                .map_err(|e| failure(e, "Reconnect node"))?;
            println!(
                "Reconnect requested for '{}'; the status updates on the next listing",
                node.name
            );
            Ok(())
        }
    }
}

async fn handle_list(directory: &NodeDirectory, policy: &StatusPolicy, json: bool) -> anyhow::Result<()> {
    let nodes = directory
        .list_nodes()
        .await
        .map_err(|e| failure(e, "List nodes"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&nodes)?);
        return Ok(());
    }
    if nodes.is_empty() {
        println!("No nodes found");
        return Ok(());
    }

    let now = SystemTime::now();
    println!(
        "{:>5}  {:<20} {:<28} {:<16} {}",
        "ID", "NAME", "ENDPOINT", "STATUS", "XRAY"
    );
    for node in &nodes {
        let view = project_status_at(node, now, policy);
        println!(
            "{:>5}  {:<20} {:<28} {} {:<14} {}",
            node.id,
            node.name,
            endpoint(node),
            view.icon,
            view.label,
            node.xray_version.as_deref().unwrap_or("-")
        );
        if let (true, Some(message)) = (view.reconnectable, &node.message) {
            println!("{:>7}└─ {}", "", message);
        }
    }
    Ok(())
}

async fn handle_delete(directory: &NodeDirectory, id: NodeId, yes: bool) -> anyhow::Result<()> {
    if !yes {
        bail!("refusing to delete node {} without --yes", id);
    }
    directory.list_nodes().await.map_err(|e| failure(e, "List nodes"))?;
    match directory.mark_for_deletion(id) {
        Ok(()) => {}
        Err(PanelError::NotFound(_)) => {
            println!("Node {} is already gone", id);
            return Ok(());
        }
        Err(e) => return Err(failure(e, "Delete node")),
    }
    match directory
        .delete_node(id)
        .await
        .map_err(|e| failure(e, "Delete node"))?
    {
        DeleteOutcome::Deleted => println!("Node {} deleted", id),
        DeleteOutcome::AlreadyGone => println!("Node {} is already gone", id),
    }
    Ok(())
}

/// Submit the editor and turn a rejection into a readable error
async fn save(editor: &mut NodeEditor) -> anyhow::Result<Node> {
    match editor.submit().await {
        SubmitOutcome::Saved(node) | SubmitOutcome::SavedInBackground(node) => Ok(node),
        SubmitOutcome::FailedInBackground(notice) => bail!(notice.message),
        SubmitOutcome::Rejected(e) => {
            let fields: Vec<String> = [Field::Name, Field::Address, Field::Port]
                .into_iter()
                .filter_map(|f| editor.field_error(f).map(|msg| format!("  {}: {}", f, msg)))
                .collect();
            if !fields.is_empty() {
                bail!("the node was not saved:\n{}", fields.join("\n"));
            }
            match editor.notice() {
                Some(notice) => bail!(notice.message.clone()),
                None => Err(e.into()),
            }
        }
    }
}

fn endpoint(node: &Node) -> String {
    match node.port {
        Some(port) => format!("{}:{}", node.address, port),
        None => node.address.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepanel_core::memory::MemoryApi;
    use nodepanel_core::model::NodeStatus;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryApi>, Directory) {
        let api = Arc::new(MemoryApi::new());
        let directory = Arc::new(NodeDirectory::new(api.clone()));
        (api, directory)
    }

    #[tokio::test]
    async fn test_add_then_edit() {
        let (_api, directory) = setup();
        let policy = StatusPolicy::default();
        handle_nodes_command(
            directory.clone(),
            &policy,
            NodesCommand::Add {
                name: "eu-1".into(),
                address: "1.2.3.4".into(),
                port: Some("8443".into()),
            },
        )
        .await
        .unwrap();

        let id = directory.nodes()[0].id;
        handle_nodes_command(
            directory.clone(),
            &policy,
            NodesCommand::Edit {
                id,
                name: Some("eu-1b".into()),
                address: None,
                port: Some(String::new()),
            },
        )
        .await
        .unwrap();

        let node = directory.node(id).unwrap();
        assert_eq!(node.name, "eu-1b");
        assert_eq!(node.port, None);
    }

    #[tokio::test]
    async fn test_add_reports_field_errors() {
        let (api, directory) = setup();
        let err = handle_nodes_command(
            directory,
            &StatusPolicy::default(),
            NodesCommand::Add {
                name: " ".into(),
                address: "1.2.3.4".into(),
                port: Some("99999".into()),
            },
        )
        .await
        .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("name"));
        assert!(text.contains("port"));
        assert_eq!(api.request_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_requires_yes_and_repeats_quietly() {
        let (api, directory) = setup();
        let node = api.seed_node("eu-1", "1.2.3.4", NodeStatus::Active);
        let policy = StatusPolicy::default();

        let refused = handle_nodes_command(
            directory.clone(),
            &policy,
            NodesCommand::Delete { id: node.id, yes: false },
        )
        .await;
        assert!(refused.is_err());
        assert_eq!(api.request_count(), 0);

        for _ in 0..2 {
            handle_nodes_command(
                directory.clone(),
                &policy,
                NodesCommand::Delete { id: node.id, yes: true },
            )
            .await
            .unwrap();
        }
        assert!(directory.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_only_for_error() {
        let (api, directory) = setup();
        let ok = api.seed_node("eu-1", "1.2.3.4", NodeStatus::Active);
        let broken = api.seed_node("eu-2", "1.2.3.5", NodeStatus::Error);
        let policy = StatusPolicy::default();

        assert!(
            handle_nodes_command(directory.clone(), &policy, NodesCommand::Reconnect { id: ok.id })
                .await
                .is_err()
        );
        handle_nodes_command(directory.clone(), &policy, NodesCommand::Reconnect { id: broken.id })
            .await
            .unwrap();
        assert_eq!(directory.node(broken.id).unwrap().status, NodeStatus::Error);
        assert_eq!(api.status_of(broken.id), Some(NodeStatus::Connecting));
    }
}
