//! Display status of a node and the actions it affords.

use std::time::{Duration, SystemTime};

use crate::model::{Node, NodeStatus};

/// Colour family used to render a status indicator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tone {
    Positive,
    Neutral,
    Muted,
    Negative,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusView {
    pub status: NodeStatus,
    pub label: &'static str,
    pub icon: &'static str,
    pub tone: Tone,
    /// Only nodes in `error` offer a reconnect action
    pub reconnectable: bool,
    /// Active but the backend has not heard from the node recently
    pub stale: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    pub stale_after: Option<Duration>,
}

impl StatusPolicy {
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            stale_after: Some(stale_after),
        }
    }
}

pub fn project(status: NodeStatus) -> StatusView {
    let (label, icon, tone, reconnectable) = match status {
        NodeStatus::Active => ("active", "●", Tone::Positive, false),
        NodeStatus::Connecting => ("connecting", "◐", Tone::Neutral, false),
        NodeStatus::Disabled => ("disabled", "○", Tone::Muted, false),
        NodeStatus::Error => ("error", "✗", Tone::Negative, true),
    };
    StatusView {
        status,
        label,
        icon,
        tone,
        reconnectable,
        stale: false,
    }
}

pub fn project_status(node: &Node) -> StatusView {
    project(node.status)
}

/// Projection that also accounts for how long ago the backend last saw
/// the node. Staleness only ever softens `active` to a neutral indicator.
pub fn project_status_at(node: &Node, now: SystemTime, policy: &StatusPolicy) -> StatusView {
    let view = project(node.status);
    if node.status != NodeStatus::Active {
        return view;
    }
    let (Some(stale_after), Some(last_seen)) = (policy.stale_after, node.last_seen) else {
        return view;
    };
    let Ok(now_secs) = now.duration_since(SystemTime::UNIX_EPOCH) else {
        return view;
    };
    let age = now_secs.as_secs().saturating_sub(last_seen);
    if age > stale_after.as_secs() {
        StatusView {
            label: "active (stale)",
            icon: "◌",
            tone: Tone::Neutral,
            stale: true,
            ..view
        }
    } else {
        view
    }
}
