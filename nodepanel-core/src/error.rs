//! Error taxonomy shared by the service client, the store and the editors.

use std::fmt;

use crate::model::{NodeId, Protocol};

/// Form fields that a validation or conflict error can point at
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Name,
    Address,
    Port,
    Protocol,
    Id,
    Password,
    Method,
}

impl Field {
    /// Fields the node dialog shows, in display order
    pub const NODE_FORM: [Field; 3] = [Field::Name, Field::Address, Field::Port];

    pub fn on_node_form(&self) -> bool {
        Self::NODE_FORM.contains(self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::Address => "address",
            Field::Port => "port",
            Field::Protocol => "protocol",
            Field::Id => "id",
            Field::Password => "password",
            Field::Method => "method",
        }
    }

    /// Match a backend-reported field name
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "name" => Some(Field::Name),
            "address" | "host" => Some(Field::Address),
            "port" => Some(Field::Port),
            "protocol" => Some(Field::Protocol),
            "id" | "uuid" => Some(Field::Id),
            "password" => Some(Field::Password),
            "method" | "cipher" => Some(Field::Method),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single local validation failure
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} is required")]
    Required { field: Field },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: Field, reason: String },

    #[error("a {protocol} service is already bound to this node")]
    DuplicateProtocol { protocol: Protocol },

    #[error("protocol cannot change from {existing} to {requested}; remove and add instead")]
    ProtocolImmutable {
        existing: Protocol,
        requested: Protocol,
    },
}

impl ValidationError {
    pub fn field(&self) -> Field {
        match self {
            ValidationError::Required { field } | ValidationError::Invalid { field, .. } => *field,
            ValidationError::DuplicateProtocol { .. }
            | ValidationError::ProtocolImmutable { .. } => Field::Protocol,
        }
    }
}

/// All validation failures collected from one form
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<ValidationError>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: ValidationError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn for_field(&self, field: Field) -> Option<&ValidationError> {
        self.0.iter().find(|e| e.field() == field)
    }

    /// `Ok(())` when nothing was collected
    pub fn into_result(self) -> Result<(), PanelError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(PanelError::Validation(self))
        }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(e: ValidationError) -> Self {
        Self(vec![e])
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|e| e.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        field: Option<Field>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("unexpected payload from {context}: {source}")]
    Parse {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("node {0} has not been confirmed for deletion")]
    NotConfirmed(NodeId),

    #[error("another request for {0} is still in flight")]
    Busy(String),
}

impl From<ValidationError> for PanelError {
    fn from(e: ValidationError) -> Self {
        PanelError::Validation(e.into())
    }
}

/// How a failure should reach the user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Shown next to the offending form field
    Inline,
    /// Session-level notice; the auth collaborator handles re-login
    Session,
    /// Target no longer exists; refresh instead of repeating
    AlreadyGone,
    /// Dismissible notification naming the attempted action
    Notify,
    /// Generic failure notice without retry
    Generic,
}

impl PanelError {
    pub fn disposition(&self) -> Disposition {
        match self {
            PanelError::Validation(_) => Disposition::Inline,
            PanelError::Conflict { field: Some(_), .. } => Disposition::Inline,
            PanelError::Authorization(_) => Disposition::Session,
            PanelError::NotFound(_) => Disposition::AlreadyGone,
            PanelError::Conflict { field: None, .. }
            | PanelError::Network(_)
            | PanelError::Busy(_)
            | PanelError::NotConfirmed(_)
            | PanelError::Precondition(_) => Disposition::Notify,
            PanelError::Server { .. } | PanelError::Parse { .. } => Disposition::Generic,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PanelError::NotFound(_))
    }

    /// Build the user-facing notice for a failed `action`
    pub fn notice(&self, action: &str) -> Notice {
        let message = match self.disposition() {
            Disposition::Generic => format!("{} failed: the server could not handle the request", action),
            Disposition::Session => format!("{} failed: your session is no longer valid", action),
            _ => format!("{} failed: {}", action, self),
        };
        Notice {
            action: action.to_string(),
            disposition: self.disposition(),
            message,
        }
    }
}

/// A dismissible notification produced from a failed action
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub action: String,
    pub disposition: Disposition,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispositions() {
        let v: PanelError = ValidationError::Required { field: Field::Name }.into();
        assert_eq!(v.disposition(), Disposition::Inline);
        assert_eq!(
            PanelError::Authorization("expired".into()).disposition(),
            Disposition::Session
        );
        assert_eq!(
            PanelError::NotFound("node 3".into()).disposition(),
            Disposition::AlreadyGone
        );
        assert_eq!(
            PanelError::Conflict {
                message: "duplicate".into(),
                field: None
            }
            .disposition(),
            Disposition::Notify
        );
        assert_eq!(
            PanelError::Conflict {
                message: "taken".into(),
                field: Some(Field::Name)
            }
            .disposition(),
            Disposition::Inline
        );
        assert_eq!(
            PanelError::Server {
                status: 502,
                message: "bad gateway".into()
            }
            .disposition(),
            Disposition::Generic
        );
    }

    #[test]
    fn test_notice_names_action() {
        let notice = PanelError::Network("timed out".into()).notice("Reconnect eu-1");
        assert_eq!(notice.action, "Reconnect eu-1");
        assert!(notice.message.starts_with("Reconnect eu-1 failed"));
        assert!(notice.message.contains("timed out"));

        let generic = PanelError::Server {
            status: 500,
            message: "stack trace".into(),
        }
        .notice("Add node");
        assert!(!generic.message.contains("stack trace"));
    }

    #[test]
    fn test_validation_errors_lookup() {
        let mut errors = ValidationErrors::new();
        errors.push(ValidationError::Required { field: Field::Name });
        errors.push(ValidationError::DuplicateProtocol {
            protocol: Protocol::Vless,
        });
        assert!(errors.for_field(Field::Name).is_some());
        assert!(errors.for_field(Field::Protocol).is_some());
        assert!(errors.for_field(Field::Address).is_none());
        assert!(errors.into_result().is_err());
        assert!(ValidationErrors::new().into_result().is_ok());
    }
}
