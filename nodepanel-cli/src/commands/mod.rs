mod doctor;
mod nodes;
mod services;

use std::sync::Arc;

use nodepanel_core::error::PanelError;
use nodepanel_core::store::NodeDirectory;

pub use doctor::run_doctor;
pub use nodes::{NodesCommand, handle_nodes_command};
pub use services::{ServicesCommand, describe as describe_settings, handle_services_command};

pub type Directory = Arc<NodeDirectory>;

/// Turn a failed `action` into the message the user sees
fn failure(e: PanelError, action: &str) -> anyhow::Error {
    anyhow::anyhow!(e.notice(action).message)
}
