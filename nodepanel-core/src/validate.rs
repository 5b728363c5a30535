//! Local, pre-request validation of node and binding drafts.

use crate::error::{Field, ValidationError, ValidationErrors};
use crate::model::{NodeChanges, NodeForm, NewNode, ProtocolSettings, SHADOWSOCKS_METHODS};

/// Checked basic settings, ready to be sent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckedNode {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
}

impl CheckedNode {
    pub fn into_new(self) -> NewNode {
        NewNode {
            name: self.name,
            address: self.address,
            port: self.port,
        }
    }

    pub fn into_changes(self) -> NodeChanges {
        NodeChanges {
            name: self.name,
            address: self.address,
            port: self.port,
        }
    }
}

pub fn parse_port(raw: &str) -> Result<Option<u16>, ValidationError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(ValidationError::Invalid {
            field: Field::Port,
            reason: "must be a number between 1 and 65535".into(),
        }),
        Ok(p) => Ok(Some(p)),
    }
}

pub fn check_port(port: Option<u16>) -> Result<(), ValidationError> {
    match port {
        Some(0) => Err(ValidationError::Invalid {
            field: Field::Port,
            reason: "must be a number between 1 and 65535".into(),
        }),
        _ => Ok(()),
    }
}

/// Validate a node form; collects every failing field
pub fn check_node_form(form: &NodeForm) -> Result<CheckedNode, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let name = form.name.trim();
    if name.is_empty() {
        errors.push(ValidationError::Required { field: Field::Name });
    }

    let address = form.address.trim();
    if address.is_empty() {
        errors.push(ValidationError::Required {
            field: Field::Address,
        });
    } else if address.chars().any(char::is_whitespace) || address.contains('/') {
        errors.push(ValidationError::Invalid {
            field: Field::Address,
            reason: "must be a bare host name or IP address".into(),
        });
    }

    let port = match parse_port(&form.port) {
        Ok(p) => p,
        Err(e) => {
            errors.push(e);
            None
        }
    };

    if errors.is_empty() {
        Ok(CheckedNode {
            name: name.to_string(),
            address: address.to_string(),
            port,
        })
    } else {
        Err(errors)
    }
}

fn check_uuid(id: &str, errors: &mut ValidationErrors) {
    if id.trim().is_empty() {
        errors.push(ValidationError::Required { field: Field::Id });
    } else if uuid::Uuid::parse_str(id.trim()).is_err() {
        errors.push(ValidationError::Invalid {
            field: Field::Id,
            reason: "must be a UUID".into(),
        });
    }
}

fn check_password(password: &str, errors: &mut ValidationErrors) {
    if password.is_empty() {
        errors.push(ValidationError::Required {
            field: Field::Password,
        });
    }
}

/// Validate protocol-specific settings
pub fn check_settings(settings: &ProtocolSettings) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    match settings {
        ProtocolSettings::Vmess { id, .. } => check_uuid(id, &mut errors),
        ProtocolSettings::Vless { id, .. } => check_uuid(id, &mut errors),
        ProtocolSettings::Trojan { password } => check_password(password, &mut errors),
        ProtocolSettings::Shadowsocks { method, password } => {
            if !SHADOWSOCKS_METHODS.contains(&method.as_str()) {
                errors.push(ValidationError::Invalid {
                    field: Field::Method,
                    reason: format!("unsupported cipher '{}'", method),
                });
            }
            check_password(password, &mut errors);
        }
    }
    errors
}
