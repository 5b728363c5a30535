use nodepanel_core::config::ConfigError;
use nodepanel_core::error::{Disposition, PanelError};

use crate::session::{self, Origin, Overrides, Resolved};

#[derive(Debug)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub hint: Option<String>,
}

impl Check {
    fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: message.into(),
            hint: None,
        }
    }

    fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: message.into(),
            hint: None,
        }
    }

    fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

pub async fn run_doctor(overrides: &Overrides) -> anyhow::Result<()> {
    println!("nodepanel doctor\n");

    let mut checks = Vec::new();
    let resolved = session::resolve(overrides);
    checks.push(check_config(&resolved));

    if let Ok(resolved) = &resolved {
        checks.push(check_token(resolved));
        checks.push(check_backend(resolved).await);
    }

    for check in &checks {
        print_check(check);
    }
    println!();

    let failed: Vec<_> = checks.iter().filter(|c| !c.passed).collect();
    if failed.is_empty() {
        println!("All checks passed!");
    } else {
        println!("Issues found:");
        for check in &failed {
            println!("  - {}: {}", check.name, check.message);
            if let Some(hint) = &check.hint {
                println!("    Hint: {}", hint);
            }
        }
    }
    Ok(())
}

fn print_check(check: &Check) {
    let icon = if check.passed { "✓" } else { "✗" };
    let color = if check.passed { "\x1b[32m" } else { "\x1b[31m" };
    let reset = "\x1b[0m";

    println!("  {}{}{} {}: {}", color, icon, reset, check.name, check.message);
    if let Some(hint) = &check.hint {
        println!("    └─ {}", hint);
    }
}

fn check_config(resolved: &Result<Resolved, ConfigError>) -> Check {
    match resolved {
        Ok(resolved) => Check::ok("config", format!("loaded from {}", resolved.origin)),
        Err(ConfigError::NotFound { searched }) => Check::fail(
            "config",
            format!("no config file found ({} locations searched)", searched.len()),
        )
        .with_hint("create nodepanel.yaml, pass --config, or pass --base-url"),
        Err(e) => Check::fail("config", e.to_string()),
    }
}

fn check_token(resolved: &Resolved) -> Check {
    if resolved.origin == Origin::Demo {
        return Check::ok("token", "not needed for the demo backend");
    }
    let backend = &resolved.config.backend;
    match (&backend.token, backend.resolve_token()) {
        (Some(t), Some(_)) if !t.is_empty() => Check::ok("token", "set in config"),
        (_, Some(_)) => Check::ok("token", format!("read from ${}", backend.token_env)),
        (_, None) => Check::fail("token", "no access token configured")
            .with_hint(format!("export {}=<token> or pass --token", backend.token_env)),
    }
}

async fn check_backend(resolved: &Resolved) -> Check {
    let name = format!("backend {}", resolved.config.backend.base_url);
    let directory = match session::connect(resolved) {
        Ok(directory) => directory,
        Err(e) => return Check::fail(name, e.to_string()),
    };
    match directory.list_nodes().await {
        Ok(nodes) => Check::ok(name, format!("reachable, {} node(s)", nodes.len())),
        Err(e) => backend_failure(name, &e),
    }
}

fn backend_failure(name: String, e: &PanelError) -> Check {
    let check = Check::fail(name, e.to_string());
    match e.disposition() {
        Disposition::Session => check.with_hint("the token was rejected; issue a new one"),
        Disposition::AlreadyGone => check.with_hint("check that base_url includes the API prefix"),
        _ => match e {
            PanelError::Network(_) => check.with_hint("is the panel running and reachable from here?"),
            PanelError::Parse { .. } => check.with_hint("base_url does not point at a panel API"),
            _ => check,
        },
    }
}
