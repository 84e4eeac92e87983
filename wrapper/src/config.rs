//! Process discovery and file-layout helpers.
//!
//! Resolves an `HOME`-relative profile directory and surfaces a missing
//! host binary as a typed `BinaryNotFound` error rather than a generic
//! string.

use std::path::{Path, PathBuf};

use thiserror::Error;

pub const PROFILE_DIR_NAME: &str = ".cc-trace";
pub const DEFAULT_AI_BASE_URL: &str = "https://api.anthropic.com";
pub const HOST_BASE_URL_ENV: &str = "ANTHROPIC_BASE_URL";
/// The host CLI this wrapper interposes on. Its own hook-settings
/// convention (`.claude/settings*.json`) fixes which binary that is.
pub const HOST_BINARY_NAME: &str = "claude";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine home directory (HOME is not set)")]
    NoHomeDir,
    #[error("host binary not found on PATH (set MOCK_HOST_PATH to override): {0}")]
    HostBinaryNotFound(String),
}

/// `<userHome>/.cc-trace`.
pub fn profile_dir() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::NoHomeDir)?;
    Ok(PathBuf::from(home).join(PROFILE_DIR_NAME))
}

pub fn logs_dir() -> Result<PathBuf, ConfigError> {
    Ok(profile_dir()?.join("logs"))
}

/// Locates the host CLI binary this wrapper interposes on. `host_name` is
/// the binary name to search `PATH` for (e.g. `"claude"`); `MOCK_HOST_PATH`
/// overrides discovery entirely, which is how the test harness and
/// `cc-trace doctor` point at a stand-in binary without a real install.
pub fn discover_host_binary(host_name: &str) -> Result<PathBuf, ConfigError> {
    if let Ok(mock) = std::env::var(cc_trace_core::run::ENV_MOCK_HOST_PATH) {
        return Ok(PathBuf::from(mock));
    }
    which(host_name).ok_or_else(|| ConfigError::HostBinaryNotFound(host_name.to_string()))
}

fn which(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(name);
        is_executable(&candidate).then_some(candidate)
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Resolves the upstream AI-provider base URL the proxy forwards to.
pub fn upstream_base_url() -> String {
    std::env::var(cc_trace_core::run::ENV_AI_BASE_URL).unwrap_or_else(|_| DEFAULT_AI_BASE_URL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn mock_host_path_overrides_path_search() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::set_var(cc_trace_core::run::ENV_MOCK_HOST_PATH, "/bin/true");
        let path = discover_host_binary("definitely-not-a-real-binary-xyz").unwrap();
        assert_eq!(path, PathBuf::from("/bin/true"));
        std::env::remove_var(cc_trace_core::run::ENV_MOCK_HOST_PATH);
    }

    #[test]
    fn missing_binary_is_a_typed_error() {
        let _guard = ENV_GUARD.lock().unwrap();
        std::env::remove_var(cc_trace_core::run::ENV_MOCK_HOST_PATH);
        let err = discover_host_binary("definitely-not-a-real-binary-xyz").unwrap_err();
        assert!(matches!(err, ConfigError::HostBinaryNotFound(_)));
    }
}
