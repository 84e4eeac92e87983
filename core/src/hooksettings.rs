//! Hook-settings discovery.
//!
//! Reads the host's own settings files — user-global, project, and
//! project-local, in that precedence order — and extracts the
//! user-configured hook commands for a given event, deduplicating across
//! files and guarding against a command that would re-invoke the
//! orchestrator itself (cycle guard).
//!
//! A malformed settings file is a hard error, not a skip: silently ignoring
//! a broken settings file would hide a user misconfiguration that's
//! otherwise undebuggable.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookSettingsError {
    #[error("failed to read hook settings file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed hook settings file {0}: {1}")]
    Parse(PathBuf, serde_json::Error),
}

#[derive(Debug, Clone, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    hooks: std::collections::HashMap<String, Vec<HookGroup>>,
}

#[derive(Debug, Clone, Deserialize)]
struct HookGroup {
    #[serde(default)]
    matcher: Option<String>,
    #[serde(default)]
    hooks: Vec<HookCommand>,
}

#[derive(Debug, Clone, Deserialize)]
struct HookCommand {
    command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveredCommand {
    pub command: String,
}

/// Settings files in host precedence order: the
/// user-global file applies to every project, the project file is checked
/// into the repo, and the project-local file is the user's personal,
/// untracked override for that project.
pub fn settings_file_paths(home_dir: &Path, project_dir: &Path) -> Vec<PathBuf> {
    vec![
        home_dir.join(".claude").join("settings.json"),
        project_dir.join(".claude").join("settings.json"),
        project_dir.join(".claude").join("settings.local.json"),
    ]
}

/// Loads, validates and merges the hook commands configured for `event`
/// (and, for tool-scoped events, matching `tool_name` against each group's
/// regex matcher) across the given settings files.
///
/// `orchestrator_marker` is a substring (e.g. the orchestrator binary's own
/// path or a reserved hook name) used to filter out a command that would
/// recursively invoke the orchestrator (cycle guard).
pub fn discover_commands(
    settings_paths: &[PathBuf],
    event: &str,
    tool_name: Option<&str>,
    orchestrator_marker: &str,
) -> Result<Vec<DiscoveredCommand>, HookSettingsError> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for path in settings_paths {
        if !path.exists() {
            continue;
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| HookSettingsError::Io(path.clone(), e))?;
        let parsed: SettingsFile = serde_json::from_str(&content)
            .map_err(|e| HookSettingsError::Parse(path.clone(), e))?;

        let Some(groups) = parsed.hooks.get(event) else {
            continue;
        };

        for group in groups {
            if !matcher_matches(group.matcher.as_deref(), tool_name) {
                continue;
            }
            for hook in &group.hooks {
                if hook.command.contains(orchestrator_marker) {
                    continue;
                }
                if seen.insert(hook.command.clone()) {
                    out.push(DiscoveredCommand {
                        command: hook.command.clone(),
                    });
                }
            }
        }
    }

    Ok(out)
}

fn matcher_matches(matcher: Option<&str>, tool_name: Option<&str>) -> bool {
    match (matcher, tool_name) {
        (None, _) => true,
        (Some(_), None) => true,
        (Some(pattern), Some(tool)) => Regex::new(pattern)
            .map(|re| re.is_match(tool))
            .unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn dedups_identical_commands_across_files() {
        let dir = tempdir().unwrap();
        let user = dir.path().join("home/.claude/settings.json");
        let project = dir.path().join("proj/.claude/settings.json");
        let body = r#"{"hooks": {"PostToolUse": [{"hooks": [{"command": "notify.sh"}]}]}}"#;
        write(&user, body);
        write(&project, body);

        let commands = discover_commands(
            &[user, project],
            "PostToolUse",
            None,
            "cc-trace-hook-orchestrator",
        )
        .unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn matcher_filters_by_tool_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".claude/settings.json");
        write(
            &path,
            r#"{"hooks": {"PreToolUse": [{"matcher": "^Bash$", "hooks": [{"command": "guard.sh"}]}]}}"#,
        );

        let matches = discover_commands(&[path.clone()], "PreToolUse", Some("Bash"), "x").unwrap();
        assert_eq!(matches.len(), 1);

        let no_match = discover_commands(&[path], "PreToolUse", Some("Read"), "x").unwrap();
        assert!(no_match.is_empty());
    }

    #[test]
    fn cycle_guard_skips_orchestrator_self_invocation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".claude/settings.json");
        write(
            &path,
            r#"{"hooks": {"Stop": [{"hooks": [{"command": "cc-trace-hook-orchestrator run"}]}]}}"#,
        );
        let commands =
            discover_commands(&[path], "Stop", None, "cc-trace-hook-orchestrator").unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn malformed_file_is_a_hard_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".claude/settings.json");
        write(&path, "{not valid json");
        let err = discover_commands(&[path], "Stop", None, "x").unwrap_err();
        assert!(matches!(err, HookSettingsError::Parse(_, _)));
    }
}
