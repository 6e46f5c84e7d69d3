use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectedBinary {
    pub path: PathBuf,
    pub version: Option<String>,
}

/// Locate `name` (a bare command or a path) and read its version string.
pub fn detect_binary(name: &str) -> Option<DetectedBinary> {
    let path = match which::which(name) {
        Ok(path) => path,
        Err(err) => {
            debug!("Binary '{name}' not found on PATH: {err}");
            return None;
        }
    };

    let version = detect_version(&path);
    Some(DetectedBinary { path, version })
}

fn detect_version(path: &Path) -> Option<String> {
    for flag in ["--version", "version"] {
        let output = match Command::new(path).arg(flag).output() {
            Ok(output) => output,
            Err(_) => continue,
        };

        if !output.status.success() {
            continue;
        }

        let version_output = String::from_utf8_lossy(&output.stdout);
        if let Some(line) = version_output.lines().map(str::trim).find(|l| !l.is_empty()) {
            debug!("Detected version for {}: {line}", path.display());
            return Some(line.to_string());
        }
    }

    debug!("Could not detect version for: {}", path.display());
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[cfg(unix)]
    #[test]
    fn detects_version_from_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("mytool");
        fs::write(&path, "#!/bin/sh\necho \"mytool 1.2.3\"\n").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();

        let detected = detect_binary(path.to_str().unwrap()).unwrap();
        assert_eq!(detected.version.as_deref(), Some("mytool 1.2.3"));
    }

    #[test]
    fn missing_binary_is_none() {
        assert!(detect_binary("devtool-definitely-not-installed-xyz").is_none());
    }
}
