//! Tool-use correlator.
//!
//! Tracks AI-provider-declared `tool_use` intentions observed on API
//! responses and matches them against later `PostToolUse` hook executions
//! by `(tool_name, canonical tool_input)` equality, most-recent-first. Also
//! tracks `PreToolUse` start times by the same key so a later `PostToolUse`
//! can compute the tool's wall-clock duration.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Bound on the in-memory pending list.
const MAX_PENDING: usize = 256;
/// How many of the most recent intentions a PostToolUse event is matched
/// against.
const MATCH_WINDOW: usize = 50;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingIntention {
    pub tool_use_id: String,
    pub tool_name: String,
    pub tool_input: Value,
    pub observed_at_unix_nano: u128,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingToolStart {
    pub tool_name: String,
    pub tool_input: Value,
    pub started_at_unix_nano: u128,
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Canonicalizes a JSON value for equality comparisons: object keys sorted,
/// no insignificant whitespace, recursively").
pub fn canonicalize(value: &Value) -> String {
    serde_json::to_string(&sort_keys(value)).unwrap_or_default()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), sort_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Per-process pending-intention store. A sidecar file persists each
/// intention as it's recorded so that a separate orchestrator process
/// launched later in the same run can still recover it.
pub struct Correlator {
    pending: DashMap<(), VecDeque<PendingIntention>>,
    tool_starts: DashMap<(), VecDeque<PendingToolStart>>,
    sidecar_path: Option<PathBuf>,
    tool_start_sidecar_path: Option<PathBuf>,
}

const SLOT: () = ();

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            tool_starts: DashMap::new(),
            sidecar_path: None,
            tool_start_sidecar_path: None,
        }
    }

    pub fn with_sidecar(run_dir: &Path) -> Self {
        let mut correlator = Self::new();
        correlator.sidecar_path = Some(run_dir.join("pending_tool_use.jsonl"));
        correlator.tool_start_sidecar_path = Some(run_dir.join("pending_tool_start.jsonl"));
        correlator.load_sidecar();
        correlator.load_tool_start_sidecar();
        correlator
    }

    fn load_sidecar(&self) {
        let Some(path) = &self.sidecar_path else {
            return;
        };
        let Ok(content) = fs::read_to_string(path) else {
            return;
        };
        let mut queue = VecDeque::new();
        for line in content.lines() {
            if let Ok(intention) = serde_json::from_str::<PendingIntention>(line) {
                queue.push_back(intention);
            }
        }
        if !queue.is_empty() {
            self.pending.insert(SLOT, queue);
        }
    }

    fn append_sidecar(&self, intention: &PendingIntention) {
        let Some(path) = &self.sidecar_path else {
            return;
        };
        if let Ok(line) = serde_json::to_string(intention) {
            let _ = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| {
                    use std::io::Write;
                    writeln!(f, "{line}")
                });
        }
    }

    fn load_tool_start_sidecar(&self) {
        let Some(path) = &self.tool_start_sidecar_path else {
            return;
        };
        let Ok(content) = fs::read_to_string(path) else {
            return;
        };
        let mut queue = VecDeque::new();
        for line in content.lines() {
            if let Ok(start) = serde_json::from_str::<PendingToolStart>(line) {
                queue.push_back(start);
            }
        }
        if !queue.is_empty() {
            self.tool_starts.insert(SLOT, queue);
        }
    }

    fn append_tool_start_sidecar(&self, start: &PendingToolStart) {
        let Some(path) = &self.tool_start_sidecar_path else {
            return;
        };
        if let Ok(line) = serde_json::to_string(start) {
            let _ = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut f| {
                    use std::io::Write;
                    writeln!(f, "{line}")
                });
        }
    }

    /// Records a `tool_use` content block observed in an API response.
    pub fn record_intention(&self, tool_use_id: String, tool_name: String, tool_input: Value) {
        let intention = PendingIntention {
            tool_use_id,
            tool_name,
            tool_input,
            observed_at_unix_nano: now_nanos(),
        };
        self.append_sidecar(&intention);

        let mut entry = self.pending.entry(SLOT).or_default();
        entry.push_front(intention);
        while entry.len() > MAX_PENDING {
            entry.pop_back();
        }
    }

    /// Matches a PostToolUse event against the pending intentions.
    /// Returns the matched `tool_use_id`, if any.
    pub fn match_tool_use(&self, tool_name: &str, tool_input: &Value) -> Option<String> {
        let entry = self.pending.get(&SLOT)?;
        let canonical_input = canonicalize(tool_input);
        entry
            .iter()
            .take(MATCH_WINDOW)
            .find(|intention| {
                intention.tool_name == tool_name
                    && canonicalize(&intention.tool_input) == canonical_input
            })
            .map(|intention| intention.tool_use_id.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.get(&SLOT).map(|e| e.len()).unwrap_or(0)
    }

    /// Records the start time of a `PreToolUse` event so a later
    /// `PostToolUse` for the same `(tool_name, canonical tool_input)` can
    /// compute its duration.
    pub fn record_tool_start(&self, tool_name: String, tool_input: Value) {
        let start = PendingToolStart {
            tool_name,
            tool_input,
            started_at_unix_nano: now_nanos(),
        };
        self.append_tool_start_sidecar(&start);

        let mut entry = self.tool_starts.entry(SLOT).or_default();
        entry.push_front(start);
        while entry.len() > MAX_PENDING {
            entry.pop_back();
        }
    }

    /// Consumes the matching `PreToolUse` start time, if any, and returns
    /// the elapsed duration in milliseconds for a `PostToolUse` event.
    pub fn take_tool_duration_ms(&self, tool_name: &str, tool_input: &Value) -> Option<f64> {
        let mut entry = self.tool_starts.get_mut(&SLOT)?;
        let canonical_input = canonicalize(tool_input);
        let position = entry
            .iter()
            .take(MATCH_WINDOW)
            .position(|start| start.tool_name == tool_name && canonicalize(&start.tool_input) == canonical_input)?;
        let start = entry.remove(position)?;
        let elapsed_nanos = now_nanos().saturating_sub(start.started_at_unix_nano);
        Some(elapsed_nanos as f64 / 1_000_000.0)
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_identical_tool_input() {
        let correlator = Correlator::new();
        correlator.record_intention(
            "tu_1".to_string(),
            "read_file".to_string(),
            json!({"path": "/x"}),
        );
        let matched = correlator.match_tool_use("read_file", &json!({"path": "/x"}));
        assert_eq!(matched, Some("tu_1".to_string()));
    }

    #[test]
    fn canonicalization_ignores_key_order_and_whitespace() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a":    2, "b":1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn most_recent_duplicate_wins() {
        let correlator = Correlator::new();
        correlator.record_intention(
            "tu_older".to_string(),
            "bash".to_string(),
            json!({"cmd": "ls"}),
        );
        correlator.record_intention(
            "tu_newer".to_string(),
            "bash".to_string(),
            json!({"cmd": "ls"}),
        );
        let matched = correlator.match_tool_use("bash", &json!({"cmd": "ls"}));
        assert_eq!(matched, Some("tu_newer".to_string()));
    }

    #[test]
    fn no_match_returns_none_without_panicking() {
        let correlator = Correlator::new();
        assert_eq!(correlator.match_tool_use("missing", &json!({})), None);
    }

    #[test]
    fn tool_start_duration_is_nonnegative_and_consumed_once() {
        let correlator = Correlator::new();
        correlator.record_tool_start("bash".to_string(), json!({"cmd": "ls"}));
        let duration = correlator.take_tool_duration_ms("bash", &json!({"cmd": "ls"}));
        assert!(duration.is_some());
        assert!(duration.unwrap() >= 0.0);
        // a second PostToolUse for the same input has nothing left to match
        assert_eq!(correlator.take_tool_duration_ms("bash", &json!({"cmd": "ls"})), None);
    }

    #[test]
    fn tool_start_with_no_match_returns_none() {
        let correlator = Correlator::new();
        assert_eq!(correlator.take_tool_duration_ms("missing", &json!({})), None);
    }

    #[test]
    fn overflow_evicts_oldest_intention() {
        let correlator = Correlator::new();
        for i in 0..(MAX_PENDING + 10) {
            correlator.record_intention(
                format!("tu_{i}"),
                "tool".to_string(),
                json!({"i": i}),
            );
        }
        assert_eq!(correlator.pending_count(), MAX_PENDING);
        // the very first recorded intention should have been evicted
        assert_eq!(correlator.match_tool_use("tool", &json!({"i": 0})), None);
    }
}
