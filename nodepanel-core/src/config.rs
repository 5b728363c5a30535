use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::status::StatusPolicy;

/// Backend connection settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Base URL of the panel API, e.g. `https://panel.example.com/api`
    pub base_url: String,

    /// Access token (prefer `token_env` so secrets stay out of the file)
    #[serde(default)]
    pub token: Option<String>,

    /// Environment variable holding the access token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_token_env() -> String {
    "NODEPANEL_TOKEN".into()
}
fn default_timeout() -> u64 {
    10_000
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: None,
            token_env: default_token_env(),
            timeout_ms: default_timeout(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Token from the file, falling back to `token_env`
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(&self.token_env).ok().filter(|t| !t.is_empty()))
    }
}

/// Terminal dashboard settings
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DashboardConfig {
    /// How often the node table re-reads the backend
    #[serde(default = "default_refresh")]
    pub refresh_ms: u64,

    /// Active nodes not seen for this long are shown as stale (0 = never)
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

fn default_refresh() -> u64 {
    5_000
}
fn default_stale_after() -> u64 {
    120
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_ms: default_refresh(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl DashboardConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(250))
    }

    pub fn status_policy(&self) -> StatusPolicy {
        match self.stale_after_secs {
            0 => StatusPolicy::default(),
            secs => StatusPolicy::with_stale_after(Duration::from_secs(secs)),
        }
    }
}

/// Root configuration file structure
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PanelConfig {
    #[serde(default = "default_version")]
    pub version: String,

    pub backend: BackendConfig,

    #[serde(default)]
    pub dashboard: DashboardConfig,
}

fn default_version() -> String {
    "1".into()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("backend.base_url must start with http:// or https://, got '{0}'")]
    InvalidBaseUrl(String),

    #[error("backend.timeout_ms must be greater than zero")]
    ZeroTimeout,

    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

pub const CONFIG_ENV: &str = "NODEPANEL_CONFIG";
const CONFIG_NAMES: [&str; 4] = [
    "nodepanel.yaml",
    "nodepanel.yml",
    ".nodepanel.yaml",
    ".nodepanel.yml",
];

impl PanelConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            version: default_version(),
            backend,
            dashboard: DashboardConfig::default(),
        }
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a string. Values are checked by
    /// `validate` once command-line overrides have been applied.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Search `$NODEPANEL_CONFIG`, then the start directory and its parents
    pub fn discover(start_dir: &Path) -> Result<(PathBuf, Self), ConfigError> {
        let mut searched = Vec::new();

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Ok((path.clone(), Self::load(&path)?));
            }
            searched.push(path);
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            for name in &CONFIG_NAMES {
                let path = current.join(name);
                if path.exists() {
                    return Ok((path.clone(), Self::load(&path)?));
                }
                searched.push(path);
            }
            dir = current.parent();
        }

        Err(ConfigError::NotFound { searched })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidBaseUrl(url.to_string()));
        }
        if self.backend.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
version: "1"
backend:
  base_url: https://panel.example.com/api
  token_env: PANEL_TOKEN
  timeout_ms: 3000
dashboard:
  refresh_ms: 2000
  stale_after_secs: 0
"#;
        let config = PanelConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.backend.token_env, "PANEL_TOKEN");
        assert_eq!(config.backend.timeout(), Duration::from_millis(3000));
        assert_eq!(config.dashboard.refresh_interval(), Duration::from_secs(2));
        assert_eq!(config.dashboard.status_policy(), StatusPolicy::default());
    }

    #[test]
    fn test_defaults() {
        let config = PanelConfig::from_yaml("backend:\n  base_url: http://localhost:8000\n").unwrap();
        assert_eq!(config.backend.timeout_ms, 10_000);
        assert_eq!(config.backend.token_env, "NODEPANEL_TOKEN");
        assert_eq!(
            config.dashboard.status_policy().stale_after,
            Some(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_rejects_bad_base_url_and_timeout() {
        // parsing alone accepts it; validation happens after overrides
        let config = PanelConfig::from_yaml("backend:\n  base_url: panel.example.com\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidBaseUrl(_))));

        let config =
            PanelConfig::from_yaml("backend:\n  base_url: https://x\n  timeout_ms: 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));
    }

    #[test]
    fn test_inline_token_wins() {
        let mut backend = BackendConfig::new("https://x");
        backend.token = Some("inline".into());
        backend.token_env = "NODEPANEL_TEST_UNUSED_TOKEN_VAR".into();
        assert_eq!(backend.resolve_token().as_deref(), Some("inline"));

        backend.token = None;
        assert_eq!(backend.resolve_token(), None);
    }
}
