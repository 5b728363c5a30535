use anyhow::bail;
use clap::{Args, Subcommand};

use nodepanel_core::bindings::BindingEditor;
use nodepanel_core::model::{
    BindingDraft, BindingPatch, NodeId, Protocol, ProtocolSettings, ServiceBinding, ServiceId,
};

use super::{Directory, failure};

#[derive(Subcommand, Debug)]
pub enum ServicesCommand {
    /// Show the services bound to a node
    List { node: NodeId },
    /// Bind a new protocol to a node
    Add {
        node: NodeId,
        #[arg(long)]
        protocol: Protocol,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Change a service's settings; the protocol stays the same
    Update {
        node: NodeId,
        service: ServiceId,
        /// Must match the service's current protocol when given
        #[arg(long)]
        protocol: Option<Protocol>,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Remove a service from a node
    Remove {
        node: NodeId,
        service: ServiceId,
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct SettingsArgs {
    /// Client UUID (vmess/vless); generated when omitted on add
    #[arg(long)]
    pub id: Option<String>,
    /// VLESS flow, e.g. xtls-rprx-vision
    #[arg(long)]
    pub flow: Option<String>,
    #[arg(long)]
    pub alter_id: Option<u16>,
    /// Password (trojan/shadowsocks)
    #[arg(long)]
    pub password: Option<String>,
    /// Shadowsocks cipher
    #[arg(long)]
    pub method: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub remark: Option<String>,
}

impl SettingsArgs {
    /// Settings for a new binding
    fn build(&self, protocol: Protocol) -> ProtocolSettings {
        match protocol {
            Protocol::Vmess => ProtocolSettings::Vmess {
                id: self.id.clone().unwrap_or_else(new_client_id),
                alter_id: self.alter_id.unwrap_or(0),
            },
            Protocol::Vless => ProtocolSettings::Vless {
                id: self.id.clone().unwrap_or_else(new_client_id),
                flow: self.flow.clone(),
            },
            Protocol::Trojan => ProtocolSettings::Trojan {
                password: self.password.clone().unwrap_or_default(),
            },
            Protocol::Shadowsocks => ProtocolSettings::Shadowsocks {
                method: self.method.clone().unwrap_or_default(),
                password: self.password.clone().unwrap_or_default(),
            },
        }
    }

    /// Existing settings with the given flags applied on top
    fn merge(&self, existing: &ProtocolSettings) -> ProtocolSettings {
        let mut settings = existing.clone();
        match &mut settings {
            ProtocolSettings::Vmess { id, alter_id } => {
                if let Some(v) = &self.id {
                    *id = v.clone();
                }
                if let Some(v) = self.alter_id {
                    *alter_id = v;
                }
            }
            ProtocolSettings::Vless { id, flow } => {
                if let Some(v) = &self.id {
                    *id = v.clone();
                }
                if let Some(v) = &self.flow {
                    *flow = Some(v.clone()).filter(|f| !f.is_empty());
                }
            }
            ProtocolSettings::Trojan { password } => {
                if let Some(v) = &self.password {
                    *password = v.clone();
                }
            }
            ProtocolSettings::Shadowsocks { method, password } => {
                if let Some(v) = &self.method {
                    *method = v.clone();
                }
                if let Some(v) = &self.password {
                    *password = v.clone();
                }
            }
        }
        settings
    }
}

fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub async fn handle_services_command(
    directory: Directory,
    command: ServicesCommand,
) -> anyhow::Result<()> {
    directory
        .list_nodes()
        .await
        .map_err(|e| failure(e, "List nodes"))?;

    match command {
        ServicesCommand::List { node } => {
            let editor = open(directory, node)?;
            let bindings = editor
                .list()
                .await
                .map_err(|e| failure(e, "List services"))?;
            print_bindings(&bindings);
            Ok(())
        }
        ServicesCommand::Add {
            node,
            protocol,
            settings,
        } => {
            let editor = open(directory, node)?;
            let mut draft = BindingDraft::new(settings.build(protocol));
            draft.port = settings.port;
            draft.remark = settings.remark.clone();
            let binding = editor
                .add(&draft)
                .await
                .map_err(|e| failure(e, "Add service"))?;
            println!(
                "Service {} ({}) added to node {}",
                binding.id,
                binding.protocol(),
                node
            );
            Ok(())
        }
        ServicesCommand::Update {
            node,
            service,
            protocol,
            settings,
        } => {
            let editor = open(directory, node)?;
            let current = editor
                .list()
                .await
                .map_err(|e| failure(e, "List services"))?;
            let Some(existing) = current.iter().find(|b| b.id == service) else {
                bail!("service {} does not exist on node {}", service, node);
            };

            let merged = match protocol {
                Some(p) if p != existing.protocol() => settings.build(p),
                _ => settings.merge(&existing.settings),
            };
            let mut patch = BindingPatch::new(merged);
            patch.port = settings.port.or(existing.port);
            patch.remark = settings.remark.clone().or_else(|| existing.remark.clone());

            let updated = editor
                .update(service, &patch)
                .await
                .map_err(|e| failure(e, "Update service"))?;
            println!("Service {} ({}) updated", updated.id, updated.protocol());
            Ok(())
        }
        ServicesCommand::Remove { node, service, yes } => {
            if !yes {
                bail!("refusing to remove service {} without --yes", service);
            }
            let mut editor = open(directory, node)?;
            editor.mark_for_removal(service);
            editor
                .remove(service)
                .await
                .map_err(|e| failure(e, "Remove service"))?;
            println!("Service {} removed from node {}", service, node);
            Ok(())
        }
    }
}

fn open(directory: Directory, node: NodeId) -> anyhow::Result<BindingEditor> {
    BindingEditor::open(directory, node).map_err(|e| failure(e, "Open services"))
}

fn print_bindings(bindings: &[ServiceBinding]) {
    if bindings.is_empty() {
        println!("No services configured");
        return;
    }
    println!("{:>5}  {:<12} {:<6} {:<40} {}", "ID", "PROTOCOL", "PORT", "SETTINGS", "REMARK");
    for binding in bindings {
        println!(
            "{:>5}  {:<12} {:<6} {:<40} {}",
            binding.id,
            binding.protocol(),
            binding.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
            describe(&binding.settings),
            binding.remark.as_deref().unwrap_or("")
        );
    }
}

/// One-line summary that never prints a secret
pub fn describe(settings: &ProtocolSettings) -> String {
    match settings {
        ProtocolSettings::Vmess { id, alter_id } => format!("id={} alterId={}", id, alter_id),
        ProtocolSettings::Vless { id, flow } => match flow {
            Some(flow) => format!("id={} flow={}", id, flow),
            None => format!("id={}", id),
        },
        ProtocolSettings::Trojan { .. } => "password=***".to_string(),
        ProtocolSettings::Shadowsocks { method, .. } => format!("method={} password=***", method),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodepanel_core::memory::MemoryApi;
    use nodepanel_core::model::NodeStatus;
    use nodepanel_core::store::NodeDirectory;
    use std::sync::Arc;

    fn setup() -> (Arc<MemoryApi>, Directory, NodeId) {
        let api = Arc::new(MemoryApi::new());
        let directory = Arc::new(NodeDirectory::new(api.clone()));
        let node = api.seed_node("eu-1", "1.2.3.4", NodeStatus::Active);
        (api, directory, node.id)
    }

    #[test]
    fn test_build_generates_client_ids() {
        let settings = SettingsArgs::default().build(Protocol::Vless);
        let ProtocolSettings::Vless { id, flow } = settings else {
            panic!("expected vless");
        };
        assert!(uuid::Uuid::parse_str(&id).is_ok());
        assert_eq!(flow, None);
    }

    #[test]
    fn test_merge_keeps_unset_fields() {
        let existing = ProtocolSettings::Shadowsocks {
            method: "aes-256-gcm".into(),
            password: "old".into(),
        };
        let args = SettingsArgs {
            password: Some("new".into()),
            ..SettingsArgs::default()
        };
        assert_eq!(
            args.merge(&existing),
            ProtocolSettings::Shadowsocks {
                method: "aes-256-gcm".into(),
                password: "new".into(),
            }
        );
    }

    #[test]
    fn test_describe_hides_passwords() {
        let text = describe(&ProtocolSettings::Trojan {
            password: "hunter2".into(),
        });
        assert!(!text.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_add_update_remove() {
        let (_api, directory, node) = setup();
        handle_services_command(
            directory.clone(),
            ServicesCommand::Add {
                node,
                protocol: Protocol::Trojan,
                settings: SettingsArgs {
                    password: Some("pw".into()),
                    port: Some(443),
                    ..SettingsArgs::default()
                },
            },
        )
        .await
        .unwrap();
        let service = directory.bindings(node).unwrap()[0].id;

        handle_services_command(
            directory.clone(),
            ServicesCommand::Update {
                node,
                service,
                protocol: None,
                settings: SettingsArgs {
                    remark: Some("primary".into()),
                    ..SettingsArgs::default()
                },
            },
        )
        .await
        .unwrap();
        let binding = directory.bindings(node).unwrap()[0].clone();
        assert_eq!(binding.remark.as_deref(), Some("primary"));
        assert_eq!(binding.port, Some(443));

        handle_services_command(
            directory.clone(),
            ServicesCommand::Remove {
                node,
                service,
                yes: true,
            },
        )
        .await
        .unwrap();
        assert!(directory.bindings(node).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_protocol_change_is_refused() {
        let (api, directory, node) = setup();
        handle_services_command(
            directory.clone(),
            ServicesCommand::Add {
                node,
                protocol: Protocol::Vmess,
                settings: SettingsArgs::default(),
            },
        )
        .await
        .unwrap();
        let service = directory.bindings(node).unwrap()[0].id;
        let requests = api.request_count();

        let err = handle_services_command(
            directory,
            ServicesCommand::Update {
                node,
                service,
                protocol: Some(Protocol::Trojan),
                settings: SettingsArgs {
                    password: Some("pw".into()),
                    ..SettingsArgs::default()
                },
            },
        )
        .await;
        assert!(err.is_err());
        // the node table is still fresh; only the service list is re-read
        // and the protocol change itself sends nothing
        assert_eq!(api.request_count(), requests + 1);
    }
}
