//! Resolving configuration and building the node directory for a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use nodepanel_core::config::{BackendConfig, ConfigError, PanelConfig};
use nodepanel_core::error::PanelError;
use nodepanel_core::http::HttpPanelApi;
use nodepanel_core::memory::MemoryApi;
use nodepanel_core::model::NodeStatus;
use nodepanel_core::store::NodeDirectory;

/// Command-line values that take precedence over the config file
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub base_url: Option<String>,
    pub token: Option<String>,
    pub demo: bool,
}

/// Where the effective configuration came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    Demo,
    File(PathBuf),
    Flags,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Demo => f.write_str("built-in demo backend"),
            Origin::File(path) => write!(f, "{}", path.display()),
            Origin::Flags => f.write_str("command-line flags"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Resolved {
    pub origin: Origin,
    pub config: PanelConfig,
}

impl Resolved {
    fn demo() -> Self {
        Self {
            origin: Origin::Demo,
            config: PanelConfig::new(BackendConfig::new("memory://demo")),
        }
    }
}

pub fn resolve(overrides: &Overrides) -> Result<Resolved, ConfigError> {
    let cwd = std::env::current_dir()?;
    resolve_from(overrides, &cwd)
}

/// Resolve starting the file search at `start_dir`.
///
/// An explicit `--config` must load. Without one, a missing file is only
/// an error when `--base-url` is absent too.
pub fn resolve_from(overrides: &Overrides, start_dir: &Path) -> Result<Resolved, ConfigError> {
    if overrides.demo {
        return Ok(Resolved::demo());
    }

    let (origin, mut config) = match &overrides.config {
        Some(path) => (Origin::File(path.clone()), PanelConfig::load(path)?),
        None => match PanelConfig::discover(start_dir) {
            Ok((path, config)) => (Origin::File(path), config),
            Err(ConfigError::NotFound { .. }) if overrides.base_url.is_some() => {
                (Origin::Flags, PanelConfig::new(BackendConfig::new("")))
            }
            Err(e) => return Err(e),
        },
    };

    apply_overrides(&mut config, overrides);
    config.validate()?;
    Ok(Resolved { origin, config })
}

fn apply_overrides(config: &mut PanelConfig, overrides: &Overrides) {
    if let Some(url) = &overrides.base_url {
        config.backend.base_url = url.clone();
    }
    if let Some(token) = &overrides.token {
        config.backend.token = Some(token.clone());
    }
}

/// Build the directory against the configured backend
pub fn connect(resolved: &Resolved) -> Result<Arc<NodeDirectory>, PanelError> {
    let directory = match resolved.origin {
        Origin::Demo => NodeDirectory::new(Arc::new(demo_backend())),
        _ => NodeDirectory::new(Arc::new(HttpPanelApi::from_config(&resolved.config.backend)?)),
    };
    tracing::debug!(backend = directory.backend_name(), origin = %resolved.origin, "directory ready");
    Ok(Arc::new(directory))
}

/// In-memory backend with a handful of nodes in every state
fn demo_backend() -> MemoryApi {
    let api = MemoryApi::new()
        .with_latency(Duration::from_millis(120))
        .with_auto_progress(true);
    api.seed_node("eu-frankfurt-1", "203.0.113.10", NodeStatus::Active);
    api.seed_node("us-east-2", "198.51.100.24", NodeStatus::Connecting);
    let broken = api.seed_node("ap-tokyo-1", "192.0.2.77", NodeStatus::Active);
    api.set_status(broken.id, NodeStatus::Error);
    api.seed_node("legacy-gw", "192.0.2.5", NodeStatus::Disabled);
    api
}
