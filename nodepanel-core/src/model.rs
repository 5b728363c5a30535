use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub type NodeId = u64;
pub type ServiceId = u64;

/// Connection state of a node, as reported by the backend.
///
/// The backend owns this value. Nothing in the client writes a status
/// that was not read from a backend response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Connecting,
    Active,
    Error,
    Disabled,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 4] = [
        NodeStatus::Connecting,
        NodeStatus::Active,
        NodeStatus::Error,
        NodeStatus::Disabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Connecting => "connecting",
            NodeStatus::Active => "active",
            NodeStatus::Error => "error",
            NodeStatus::Disabled => "disabled",
        }
    }

    /// Parse a raw backend status. Unknown values map to `Connecting`.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("active") | Some("connected") => NodeStatus::Active,
            Some("error") => NodeStatus::Error,
            Some("disabled") => NodeStatus::Disabled,
            _ => NodeStatus::Connecting,
        }
    }
}

impl<'de> Deserialize<'de> for NodeStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(NodeStatus::from_wire(raw.as_deref()))
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direct client connection details, only present for nodes that expose one
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub share_uri: Option<String>,
}

/// One proxy server instance tracked by the panel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub xray_version: Option<String>,
    #[serde(default)]
    pub connection: Option<ConnectionInfo>,
    /// Unix seconds of the backend's last contact with the node
    #[serde(default)]
    pub last_seen: Option<u64>,
    /// Last error text reported by the backend
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /nodes`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNode {
    pub name: String,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// Body of `PUT /nodes/{id}`. Status is deliberately absent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChanges {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
}

/// Editable draft of a node's basic settings.
///
/// `id` is `None` while creating and carries the persisted id while
/// editing. `port` holds the raw text the user typed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeForm {
    pub id: Option<NodeId>,
    pub name: String,
    pub address: String,
    pub port: String,
}

impl NodeForm {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            address: address.into(),
            port: String::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port.to_string();
        self
    }

    pub fn from_node(node: &Node) -> Self {
        Self {
            id: Some(node.id),
            name: node.name.clone(),
            address: node.address.clone(),
            port: node.port.map(|p| p.to_string()).unwrap_or_default(),
        }
    }
}

/// Supported proxy protocols
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Trojan,
    Shadowsocks,
}

impl Protocol {
    pub const ALL: [Protocol; 4] = [
        Protocol::Vmess,
        Protocol::Vless,
        Protocol::Trojan,
        Protocol::Shadowsocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Trojan => "trojan",
            Protocol::Shadowsocks => "shadowsocks",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vmess" => Ok(Protocol::Vmess),
            "vless" => Ok(Protocol::Vless),
            "trojan" => Ok(Protocol::Trojan),
            "shadowsocks" | "ss" => Ok(Protocol::Shadowsocks),
            other => {
                let known: Vec<&str> = Protocol::ALL.iter().map(|p| p.as_str()).collect();
                Err(format!("unknown protocol '{}' (expected one of {})", other, known.join(", ")))
            }
        }
    }
}

/// Ciphers accepted for shadowsocks bindings
pub const SHADOWSOCKS_METHODS: &[&str] = &[
    "aes-128-gcm",
    "aes-256-gcm",
    "chacha20-poly1305",
    "chacha20-ietf-poly1305",
    "2022-blake3-aes-128-gcm",
    "2022-blake3-aes-256-gcm",
];

/// Protocol-specific settings. The variant determines the protocol.
///
/// Serialized as `{ "protocol": "vless", "settings": { ... } }`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "protocol", content = "settings", rename_all = "lowercase")]
pub enum ProtocolSettings {
    Vmess {
        id: String,
        #[serde(default)]
        alter_id: u16,
    },
    Vless {
        id: String,
        #[serde(default)]
        flow: Option<String>,
    },
    Trojan {
        password: String,
    },
    Shadowsocks {
        method: String,
        password: String,
    },
}

impl ProtocolSettings {
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolSettings::Vmess { .. } => Protocol::Vmess,
            ProtocolSettings::Vless { .. } => Protocol::Vless,
            ProtocolSettings::Trojan { .. } => Protocol::Trojan,
            ProtocolSettings::Shadowsocks { .. } => Protocol::Shadowsocks,
        }
    }
}

/// One protocol configuration attached to a node
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBinding {
    pub id: ServiceId,
    pub node_id: NodeId,
    #[serde(flatten)]
    pub settings: ProtocolSettings,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl ServiceBinding {
    pub fn protocol(&self) -> Protocol {
        self.settings.protocol()
    }
}

/// Body of `POST /nodes/{nodeId}/services`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingDraft {
    #[serde(flatten)]
    pub settings: ProtocolSettings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl BindingDraft {
    pub fn new(settings: ProtocolSettings) -> Self {
        Self {
            settings,
            port: None,
            remark: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn protocol(&self) -> Protocol {
        self.settings.protocol()
    }
}

/// Body of `PUT /nodes/{nodeId}/services/{serviceId}`.
///
/// Carries settings only; the protocol of an existing binding cannot
/// change, so the settings variant must match it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingPatch {
    #[serde(flatten)]
    pub settings: ProtocolSettings,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub remark: Option<String>,
}

impl BindingPatch {
    pub fn new(settings: ProtocolSettings) -> Self {
        Self {
            settings,
            port: None,
            remark: None,
        }
    }
}

/// Which node, if any, is the target of an edit or delete action
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Editing(NodeId),
    Deleting(NodeId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_defaults_to_connecting() {
        assert_eq!(NodeStatus::from_wire(Some("active")), NodeStatus::Active);
        assert_eq!(NodeStatus::from_wire(Some("Connected")), NodeStatus::Active);
        assert_eq!(NodeStatus::from_wire(Some("error")), NodeStatus::Error);
        assert_eq!(NodeStatus::from_wire(Some("disabled")), NodeStatus::Disabled);
        assert_eq!(NodeStatus::from_wire(Some("rebooting")), NodeStatus::Connecting);
        assert_eq!(NodeStatus::from_wire(None), NodeStatus::Connecting);
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!("SS".parse::<Protocol>(), Ok(Protocol::Shadowsocks));
        for protocol in Protocol::ALL {
            assert_eq!(protocol.as_str().parse::<Protocol>(), Ok(protocol));
        }
        let err = "wireguard".parse::<Protocol>().unwrap_err();
        assert!(err.contains("wireguard") && err.contains("vless"));
    }

    #[test]
    fn test_node_parses_with_missing_optionals() {
        let node: Node =
            serde_json::from_str(r#"{"id": 3, "name": "eu-1", "address": "1.2.3.4"}"#).unwrap();
        assert_eq!(node.id, 3);
        assert_eq!(node.port, None);
        assert_eq!(node.status, NodeStatus::Connecting);
        assert!(node.connection.is_none());

        let node: Node = serde_json::from_str(
            r#"{"id": 4, "name": "us-1", "address": "h", "status": null, "port": 62050}"#,
        )
        .unwrap();
        assert_eq!(node.status, NodeStatus::Connecting);
        assert_eq!(node.port, Some(62050));
    }

    #[test]
    fn test_binding_wire_shape() {
        let json = r#"{
            "id": 7,
            "node_id": 3,
            "protocol": "trojan",
            "settings": {"password": "secret"},
            "port": 443
        }"#;
        let binding: ServiceBinding = serde_json::from_str(json).unwrap();
        assert_eq!(binding.protocol(), Protocol::Trojan);
        assert_eq!(binding.port, Some(443));

        let draft = BindingDraft::new(ProtocolSettings::Vless {
            id: "b831381d-6324-4d53-ad4f-8cda48b30811".into(),
            flow: None,
        });
        let value = serde_json::to_value(&draft).unwrap();
        assert_eq!(value["protocol"], "vless");
        assert!(value["settings"]["id"].is_string());
        assert!(value.get("port").is_none());
    }

    #[test]
    fn test_protocol_from_str() {
        assert_eq!("VLESS".parse::<Protocol>().unwrap(), Protocol::Vless);
        assert_eq!("ss".parse::<Protocol>().unwrap(), Protocol::Shadowsocks);
        assert!("wireguard".parse::<Protocol>().is_err());
    }
}
