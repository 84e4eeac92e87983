//! Hook orchestrator. This process *is* the host's hook callback, so
//! there is no separate spawn-primitive patch to install, only this
//! process's own child-command handling.
//!
//! Runs as a standalone invocation (`cc-trace hook`) registered under a
//! reserved name in the host's settings files, once per hook event. Reads
//! one JSON object from stdin and is done when it prints the merged
//! response to its own stdout.

use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use cc_trace_core::correlator::Correlator;
use cc_trace_core::hooksettings;
use cc_trace_core::run::Run;
use cc_trace_core::span::SpanStatus;
use cc_trace_core::tracer::{OpenSpan, Tracer};
use cc_trace_telemetry::writer::JsonlWriter;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Substring identifying a settings-file hook command as this orchestrator
/// re-invoking itself.
pub const ORCHESTRATOR_MARKER: &str = "cc-trace hook";

const RECOGNIZED_MERGE_FIELDS: &[&str] = &["stopReason", "decision", "reason", "suppressOutput"];

/// Runs the orchestrator to completion and returns the process exit code.
/// Non-zero only for a hard configuration-bug case (a malformed settings
/// file) that should fail fast rather than silently degrade; a user hook
/// returning a nonzero exit or throwing is recorded on its span but does
/// not by itself fail the orchestrator.
pub async fn run() -> i32 {
    let mut raw_event = String::new();
    if let Err(err) = std::io::stdin().read_to_string(&mut raw_event) {
        eprintln!("cc-trace hook: failed to read event from stdin: {err}");
        return 1;
    }
    let event: Value = serde_json::from_str(&raw_event).unwrap_or(Value::Null);

    let run = match Run::from_env() {
        Ok(run) => run,
        Err(err) => {
            eprintln!("cc-trace hook: {err}");
            return 1;
        }
    };

    let sink = match JsonlWriter::open(&run) {
        Ok(writer) => Arc::new(writer),
        Err(err) => {
            eprintln!("cc-trace hook: {err}");
            return 1;
        }
    };
    let tracer = Tracer::attached(run.clone(), sink.clone());
    let correlator = Arc::new(Correlator::with_sidecar(&run.run_dir));

    if let Some(session_id) = event.get("session_id").and_then(|v| v.as_str()) {
        tracer.adopt_session_id(session_id);
        sink.update_config(session_id, std::env::var(cc_trace_core::run::ENV_PARENT_SESSION).ok());
    }

    let event_name = event
        .get("hook_event_name")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let tool_name = event.get("tool_name").and_then(|v| v.as_str()).map(str::to_string);

    let hook_started = Instant::now();
    let mut hook_span = tracer.start_hook_event_span(&event_name, tool_name.as_deref());
    let mut hook_exit_code: i64 = 0;

    if event_name == "PreToolUse" {
        if let Some(tool_name) = tool_name.as_deref() {
            let tool_input = event.get("tool_input").cloned().unwrap_or(Value::Null);
            correlator.record_tool_start(tool_name.to_string(), tool_input);
        }
    }

    let project_dir = event
        .get("cwd")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let home_dir = std::env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| project_dir.clone());

    let settings_paths = hooksettings::settings_file_paths(&home_dir, &project_dir);
    let commands = match hooksettings::discover_commands(
        &settings_paths,
        &event_name,
        tool_name.as_deref(),
        ORCHESTRATOR_MARKER,
    ) {
        Ok(commands) => commands,
        Err(err) => {
            hook_span.set_attr("hook.duration.ms", hook_started.elapsed().as_secs_f64() * 1000.0);
            hook_span.set_attr("hook.exit_code", 1i64);
            hook_span.record_exception(&err);
            hook_span.set_status(SpanStatus::Error, Some(err.to_string()));
            hook_span.end();
            print_composite(&default_composite());
            return 0;
        }
    };

    let mut composite = default_composite();
    let mut any_error = false;
    let mut blocked = false;

    for discovered in commands {
        let mut exec_span = tracer.start_hook_execution_span(&discovered.command, &hook_span, false);
        let started = Instant::now();

        match run_hook_command(&discovered.command, raw_event.as_bytes()).await {
            Ok(output) => {
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                let exit_code = output.status.code().unwrap_or(-1) as i64;
                hook_exit_code = exit_code;
                exec_span.set_attr("hook.exit_code", exit_code);
                exec_span.set_attr("hook.stdout_length", output.stdout.len() as i64);
                exec_span.set_attr("hook.stderr_length", output.stderr.len() as i64);
                exec_span.set_attr("hook.duration.ms", duration_ms);

                if !output.status.success() {
                    any_error = true;
                    let message = format!("exit code {:?}", output.status.code());
                    exec_span.set_attr("hook.error", message.clone());
                    exec_span.set_status(SpanStatus::Error, Some(message));
                }

                if let Ok(value) = serde_json::from_slice::<Value>(&output.stdout) {
                    if value.get("continue").and_then(|v| v.as_bool()) == Some(false) {
                        exec_span.set_attr("hook.exclusive", true);
                        composite = value;
                        blocked = true;
                        exec_span.end();
                        break;
                    }
                    merge_first_wins(&mut composite, &value);
                }
                exec_span.end();
            }
            Err(err) => {
                any_error = true;
                hook_exit_code = -1;
                let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
                exec_span.set_attr("hook.duration.ms", duration_ms);
                exec_span.set_attr("hook.stdout_length", 0i64);
                exec_span.set_attr("hook.stderr_length", 0i64);
                exec_span.set_attr("hook.error", err.to_string());
                exec_span.record_exception(&err);
                exec_span.set_status(SpanStatus::Error, Some(err.to_string()));
                exec_span.end();
            }
        }
    }

    if !blocked && event_name == "PostToolUse" {
        record_tool_execution(&tracer, &correlator, &hook_span, &event, tool_name.as_deref());
    }

    hook_span.set_attr("hook.duration.ms", hook_started.elapsed().as_secs_f64() * 1000.0);
    hook_span.set_attr("hook.exit_code", hook_exit_code);
    hook_span.set_status(
        if any_error { SpanStatus::Error } else { SpanStatus::Ok },
        None,
    );
    hook_span.end();
    tracer.shutdown();

    print_composite(&composite);
    0
}

fn default_composite() -> Value {
    serde_json::json!({ "continue": true })
}

fn print_composite(composite: &Value) {
    println!("{}", composite.to_string());
}

/// Merges `hook_result` into `composite` using first-wins semantics: once
/// a recognized field is set by an earlier hook, later hooks cannot
/// override it.
fn merge_first_wins(composite: &mut Value, hook_result: &Value) {
    let Some(obj) = composite.as_object_mut() else {
        return;
    };
    for field in RECOGNIZED_MERGE_FIELDS {
        if obj.contains_key(*field) {
            continue;
        }
        if let Some(value) = hook_result.get(*field) {
            if !value.is_null() {
                obj.insert(field.to_string(), value.clone());
            }
        }
    }
}

async fn run_hook_command(command: &str, stdin_payload: &[u8]) -> std::io::Result<std::process::Output> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(stdin_payload).await;
    }

    child.wait_with_output().await
}

/// Emits the tool-execution span for a PostToolUse event: correlates against
/// the correlator's pending intentions and carries `tool.name`, `tool.input`,
/// `tool.output`, `tool.duration.ms`, and `tool.use_id` when matched.
fn record_tool_execution(
    tracer: &Tracer,
    correlator: &Correlator,
    hook_span: &OpenSpan,
    event: &Value,
    tool_name: Option<&str>,
) {
    let Some(tool_name) = tool_name else { return };
    let tool_input = event.get("tool_input").cloned().unwrap_or(Value::Null);
    let tool_output = event.get("tool_response").cloned().unwrap_or(Value::Null);

    let matched = correlator.match_tool_use(tool_name, &tool_input);
    let duration_ms = correlator.take_tool_duration_ms(tool_name, &tool_input);

    let mut tool_span = tracer.start_tool_span(tool_name, &tool_input, None, Some(hook_span));
    tool_span.set_attr(
        "tool.output",
        serde_json::to_string(&tool_output).unwrap_or_default(),
    );
    if let Some(duration_ms) = duration_ms {
        tool_span.set_attr("tool.duration.ms", duration_ms);
    }
    if let Some(tool_use_id) = matched {
        tool_span.set_attr("tool.use_id", tool_use_id);
    }
    tool_span.end();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_wins_merge_keeps_earlier_value() {
        let mut composite = default_composite();
        merge_first_wins(&mut composite, &serde_json::json!({"decision": "approve"}));
        merge_first_wins(&mut composite, &serde_json::json!({"decision": "block"}));
        assert_eq!(composite.get("decision").unwrap(), "approve");
    }

    #[test]
    fn first_wins_merge_ignores_null_fields() {
        let mut composite = default_composite();
        merge_first_wins(&mut composite, &serde_json::json!({"suppressOutput": null}));
        assert!(composite.get("suppressOutput").is_none());
    }

    #[test]
    fn unrecognized_fields_are_not_merged() {
        let mut composite = default_composite();
        merge_first_wins(&mut composite, &serde_json::json!({"unrelatedField": "x"}));
        assert!(composite.get("unrelatedField").is_none());
    }
}
