use log::debug;
use serde::Serialize;
use std::fmt::Write;
use std::path::Path;

use crate::domains::containers::ContainerRuntime;
use crate::domains::settings::DevtoolConfig;
use crate::utils::binary_utils::detect_binary;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub checks: Vec<DoctorCheck>,
}

impl DoctorReport {
    pub fn is_ready(&self) -> bool {
        self.checks.iter().all(|c| c.ok)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for check in &self.checks {
            let _ = writeln!(
                out,
                "[{}] {:<10} {}",
                if check.ok { "ok" } else { "!!" },
                check.name,
                check.detail
            );
        }
        let issues = self.checks.iter().filter(|c| !c.ok).count();
        if issues == 0 {
            out.push_str("Ready.");
        } else {
            let _ = write!(out, "{issues} issue(s) found.");
        }
        out
    }
}

fn check(name: &str, ok: bool, detail: impl Into<String>) -> DoctorCheck {
    DoctorCheck {
        name: name.to_string(),
        ok,
        detail: detail.into(),
    }
}

pub async fn run_doctor(config: &DevtoolConfig, runtime: &dyn ContainerRuntime) -> DoctorReport {
    let mut checks = Vec::new();

    checks.push(match runtime.info().await {
        Ok(version) => check("engine", true, format!("{} ({version})", runtime.engine_name())),
        Err(err) => check("engine", false, err.to_string()),
    });

    let git = tokio::task::spawn_blocking(|| detect_binary("git"))
        .await
        .ok()
        .flatten();
    checks.push(match git {
        Some(binary) => check(
            "git",
            true,
            binary
                .version
                .unwrap_or_else(|| binary.path.display().to_string()),
        ),
        None => check("git", false, "git not found on PATH"),
    });

    checks.push(match check_writable(&config.data_dir) {
        Ok(()) => check("store", true, config.database_path().display().to_string()),
        Err(err) => check(
            "store",
            false,
            format!("{} is not writable: {err}", config.data_dir.display()),
        ),
    });

    checks.push(check(
        "worktrees",
        true,
        config.worktree_root().display().to_string(),
    ));
    checks.push(check("image", true, config.container.image.clone()));

    DoctorReport { checks }
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let marker = dir.join(".doctor-write-check");
    std::fs::write(&marker, b"ok")?;
    std::fs::remove_file(&marker)?;
    debug!("Store directory {} is writable", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::containers::InMemoryRuntime;
    use crate::domains::containers::docker::DockerCli;
    use std::time::Duration;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> DevtoolConfig {
        DevtoolConfig {
            data_dir: temp.path().join("data"),
            ..DevtoolConfig::default()
        }
    }

    #[tokio::test]
    async fn healthy_environment_is_ready() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        let report = run_doctor(&config, &InMemoryRuntime::new()).await;

        assert!(report.is_ready(), "{}", report.render());
        assert!(report.render().ends_with("Ready."));
        assert!(temp.path().join("data").exists());
    }

    #[tokio::test]
    async fn unreachable_engine_is_an_issue() {
        let temp = TempDir::new().unwrap();
        let mut config = config_in(&temp);
        config.container.engine = "devtool-no-such-engine".into();
        let runtime = DockerCli::new(&config.container, Duration::from_secs(5));

        let report = run_doctor(&config, &runtime).await;
        assert!(!report.is_ready());
        let engine = report.checks.iter().find(|c| c.name == "engine").unwrap();
        assert!(!engine.ok);
        assert!(report.render().ends_with("1 issue(s) found."));
    }
}
