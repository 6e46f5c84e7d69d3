use super::types::DevtoolConfig;
use crate::errors::{DevtoolError, DevtoolResult};
use log::{debug, info};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "DEVTOOL_CONFIG";
pub const HOME_ENV: &str = "DEVTOOL_HOME";

/// Resolve which config file applies: explicit flag, then `DEVTOOL_CONFIG`,
/// then the per-user config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Some(value) = std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(value));
    }

    dirs::config_dir().map(|dir| dir.join("devtool").join("config.toml"))
}

pub fn load_config(explicit: Option<&Path>) -> DevtoolResult<DevtoolConfig> {
    let mut config = match resolve_config_path(explicit) {
        Some(path) if path.exists() => {
            info!("Loading configuration from {}", path.display());
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| DevtoolError::io("read config", path.display(), e))?;
            parse_config(&raw)?
        }
        Some(path) if explicit.is_some() => {
            return Err(DevtoolError::ConfigError {
                key: "config".to_string(),
                message: format!("config file {} does not exist", path.display()),
            });
        }
        other => {
            debug!(
                "No configuration file found ({}), using defaults",
                other
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "no config dir".to_string())
            );
            DevtoolConfig::default()
        }
    };

    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        config.data_dir = PathBuf::from(home);
    }

    Ok(config)
}

pub fn parse_config(raw: &str) -> DevtoolResult<DevtoolConfig> {
    let config: DevtoolConfig = toml::from_str(raw).map_err(|e| DevtoolError::ConfigError {
        key: "toml".to_string(),
        message: e.to_string(),
    })?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &DevtoolConfig) -> DevtoolResult<()> {
    if config.container.engine.trim().is_empty() {
        return Err(DevtoolError::ConfigError {
            key: "container.engine".to_string(),
            message: "engine binary must not be empty".to_string(),
        });
    }
    if config.container.image.trim().is_empty() {
        return Err(DevtoolError::ConfigError {
            key: "container.image".to_string(),
            message: "image must not be empty".to_string(),
        });
    }
    for hook in &config.hooks {
        if hook.name.trim().is_empty() || hook.command.trim().is_empty() {
            return Err(DevtoolError::ConfigError {
                key: "hooks".to_string(),
                message: "every hook needs a name and a command".to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::hooks::HookStage;
    use crate::utils::env_adapter::ScopedEnv;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn empty_document_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.container.engine, "docker");
        assert_eq!(config.container.workdir, "/workspace");
        assert_eq!(config.timeouts.lock_wait_ms, 5_000);
        assert!(config.cleanup_worktree_on_merge);
        assert!(config.hooks.is_empty());
    }

    #[test]
    fn parses_volumes_and_hooks() {
        let raw = r#"
            integration_branch = "main"

            [container]
            engine = "podman"
            image = "ghcr.io/acme/dev:1"
            volumes = [{ name = "devtool-vscode", target = "/root/.vscode-server" }]

            [timeouts]
            lock_wait_ms = 250

            [[hooks]]
            stage = "pre-finish"
            name = "lint"
            command = "cargo clippy -- -D warnings"
            order = 10
            required = true
        "#;
        let config = parse_config(raw).unwrap();
        assert_eq!(config.integration_branch.as_deref(), Some("main"));
        assert_eq!(config.container.engine, "podman");
        assert_eq!(config.container.volumes.len(), 1);
        assert_eq!(config.container.volumes[0].target, "/root/.vscode-server");
        assert_eq!(config.timeouts.lock_wait_ms, 250);
        assert_eq!(config.hooks[0].stage, HookStage::PreFinish);
        assert!(config.hooks[0].required);
    }

    #[test]
    fn rejects_empty_engine() {
        let err = parse_config("[container]\nengine = \"\"\n").unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    #[serial]
    fn home_env_overrides_data_dir() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("config.toml");
        std::fs::write(&file, "data_dir = \"/should/be/overridden\"\n").unwrap();

        let home = temp.path().join("home");
        let config = {
            let _home = ScopedEnv::set(HOME_ENV, &home);
            load_config(Some(&file)).unwrap()
        };

        assert_eq!(config.data_dir, home);
        assert_eq!(config.database_path(), home.join("sessions.db"));
        assert_eq!(config.worktree_root(), home.join("worktrees"));
    }
}
