//! Report materializer.
//!
//! Reads the run's `trace.otlp.jsonl` (possibly several OTLP batches, one
//! per line), reconstructs the span tree and per-run aggregates, and emits
//! a single self-contained `report.html` with the OTLP data inlined as a
//! JSON literal and a small vanilla-JS viewer.

use std::fs;
use std::path::{Path, PathBuf};

use cc_trace_core::metrics::RunAggregate;
use cc_trace_core::span::{AttrValue, Span, SpanId, SpanKind, SpanStatus, TraceId};
use cc_trace_telemetry::otlp::{self, OtlpDocument, WireSpan};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to read trace file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to write report file {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

/// Reads `<run_dir>/trace.otlp.jsonl` and writes `<run_dir>/report.html`.
/// Returns the report's path. A missing or empty trace file is not an
/// error — only an I/O failure on the
/// output file is.
pub fn materialize(run_dir: &Path) -> Result<PathBuf, ReportError> {
    let trace_path = run_dir.join(cc_trace_core::run::TRACE_FILE_NAME);
    let report_path = run_dir.join(cc_trace_core::run::REPORT_FILE_NAME);

    let spans = read_spans(&trace_path)?;
    let (root, roots_synthesized) = find_or_synthesize_root(&spans);
    let aggregate = RunAggregate::compute(&spans, root.as_ref());

    let html = render_html(&spans, root.as_ref(), roots_synthesized, &aggregate);
    fs::write(&report_path, html).map_err(|e| ReportError::Write(report_path.clone(), e))?;
    Ok(report_path)
}

/// Reads every line of the trace file, tolerating a missing file (treated
/// as zero spans) and individual malformed lines (skipped rather than
/// aborting the whole materialization: a corrupted line must not take
/// down the report for every other span in the run).
fn read_spans(trace_path: &Path) -> Result<Vec<Span>, ReportError> {
    let content = match fs::read_to_string(trace_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(ReportError::Read(trace_path.to_path_buf(), err)),
    };

    let mut spans = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(doc) = serde_json::from_str::<OtlpDocument>(line) else {
            tracing::warn!(%line, "skipping malformed OTLP line in trace file");
            continue;
        };
        for wire in otlp::flatten_spans(&doc) {
            if let Some(span) = wire_span_to_core(wire) {
                spans.push(span);
            }
        }
    }
    Ok(spans)
}

fn wire_span_to_core(wire: &WireSpan) -> Option<Span> {
    let trace_id = TraceId::try_from(wire.trace_id.as_str()).ok()?;
    let span_id = SpanId::try_from(wire.span_id.as_str()).ok()?;
    let parent_span_id = wire
        .parent_span_id
        .as_deref()
        .and_then(|s| SpanId::try_from(s).ok());

    let mut attributes = std::collections::BTreeMap::new();
    for attr in &wire.attributes {
        if let Some(value) = otlp::wire_value_into_attr(attr.value.clone()) {
            attributes.insert(attr.key.clone(), value);
        }
    }

    Some(Span {
        trace_id,
        span_id,
        parent_span_id,
        name: wire.name.clone(),
        kind: SpanKind::from(wire.kind),
        start_time_unix_nano: wire.start_time_unix_nano.0,
        end_time_unix_nano: wire.end_time_unix_nano.0,
        attributes,
        status: match wire.status.code {
            otlp::WireStatusCode::Unset => SpanStatus::Unset,
            otlp::WireStatusCode::Ok => SpanStatus::Ok,
            otlp::WireStatusCode::Error => SpanStatus::Error,
        },
        status_message: wire.status.message.clone(),
    })
}

/// Finds the run's single root span, or synthesizes one spanning every
/// span's observed start/end when more than one top-level span exists. A
/// span is a root when its `parent_span_id` is either absent or doesn't
/// match any span actually present in this run.
fn find_or_synthesize_root(spans: &[Span]) -> (Option<Span>, bool) {
    if spans.is_empty() {
        return (None, false);
    }

    let ids: std::collections::HashSet<SpanId> = spans.iter().map(|s| s.span_id).collect();
    let roots: Vec<&Span> = spans
        .iter()
        .filter(|s| match s.parent_span_id {
            None => true,
            Some(parent) => !ids.contains(&parent),
        })
        .collect();

    match roots.as_slice() {
        [] => (None, false),
        [single] => (Some((*single).clone()), false),
        many => {
            let start = spans.iter().map(|s| s.start_time_unix_nano).min().unwrap_or(0);
            let end = spans.iter().map(|s| s.end_time_unix_nano).max().unwrap_or(0);
            let trace_id = many[0].trace_id;
            // The span id is derived from the trace id rather than generated
            // randomly so that re-materializing the same JSONL is idempotent
            //.
            let mut synthetic = Span::new(trace_id, "Session", SpanKind::Internal);
            synthetic.span_id = SpanId::from_seed(&format!("{}-synthetic-root", trace_id.to_hex()));
            synthetic.start_time_unix_nano = start;
            synthetic.end_time_unix_nano = end;
            (Some(synthetic), true)
        }
    }
}

fn attr_to_json(value: &AttrValue) -> Value {
    match value {
        AttrValue::String(s) => Value::String(s.clone()),
        AttrValue::Int(i) => serde_json::json!(i),
        AttrValue::Double(d) => serde_json::json!(d),
        AttrValue::Bool(b) => Value::Bool(*b),
    }
}

fn span_to_json(span: &Span) -> Value {
    serde_json::json!({
        "spanId": span.span_id.to_hex(),
        "parentSpanId": span.parent_span_id.map(|id| id.to_hex()),
        "name": span.name,
        "category": category_label(span),
        "startTimeUnixNano": span.start_time_unix_nano.to_string(),
        "endTimeUnixNano": span.end_time_unix_nano.to_string(),
        "durationMs": span.duration_ms(),
        "status": match span.status {
            SpanStatus::Unset => "UNSET",
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
        },
        "attributes": span.attributes.iter().map(|(k, v)| (k.clone(), attr_to_json(v))).collect::<serde_json::Map<_, _>>(),
    })
}

fn category_label(span: &Span) -> &'static str {
    match span.category() {
        cc_trace_core::span::SpanCategory::Api => "api",
        cc_trace_core::span::SpanCategory::Tool => "tool",
        cc_trace_core::span::SpanCategory::Hook => "hook",
        cc_trace_core::span::SpanCategory::File => "file",
        cc_trace_core::span::SpanCategory::Test => "test",
        cc_trace_core::span::SpanCategory::Other => "other",
    }
}

/// Escapes a JSON string for safe inlining inside a `<script>` tag: `<`,
/// `>`, `&`, and the two line-terminator code points that JS treats
/// specially but JSON doesn't escape by default.
fn escape_for_inline_script(json: &str) -> String {
    json.replace('&', "\\u0026")
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn render_html(spans: &[Span], root: Option<&Span>, synthesized: bool, aggregate: &RunAggregate) -> String {
    let data = serde_json::json!({
        "spans": spans.iter().map(span_to_json).collect::<Vec<_>>(),
        "rootSpanId": root.map(|r| r.span_id.to_hex()),
        "rootSynthesized": synthesized,
        "aggregate": aggregate,
    });
    let data_literal = escape_for_inline_script(&serde_json::to_string(&data).unwrap_or_else(|_| "{}".to_string()));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>cc-trace report</title>
<style>
body {{ font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", sans-serif; margin: 2rem; color: #1a1a1a; }}
h1 {{ font-size: 1.25rem; }}
table.aggregate {{ border-collapse: collapse; margin-bottom: 1.5rem; }}
table.aggregate td, table.aggregate th {{ border: 1px solid #ddd; padding: 0.3rem 0.6rem; text-align: left; font-size: 0.85rem; }}
.span-tree {{ font-family: ui-monospace, Menlo, Consolas, monospace; font-size: 0.85rem; }}
.span-node {{ margin-left: 1.25rem; border-left: 1px solid #ccc; padding-left: 0.5rem; }}
.span-row {{ cursor: pointer; padding: 2px 0; }}
.span-row:hover {{ background: #f4f4f4; }}
.cat-api {{ color: #0b5fff; }}
.cat-tool {{ color: #007a3d; }}
.cat-hook {{ color: #9a6700; }}
.cat-file {{ color: #6f42c1; }}
.cat-test {{ color: #888; }}
.status-ERROR {{ color: #c0392b; font-weight: 600; }}
.children {{ display: none; }}
.children.open {{ display: block; }}
</style>
</head>
<body>
<h1>cc-trace report</h1>
<table class="aggregate" id="aggregate-table"></table>
<div id="tree" class="span-tree"></div>
<script>
window.__CC_TRACE_REPORT__ = {data_literal};
(function() {{
  var data = window.__CC_TRACE_REPORT__;
  var byParent = {{}};
  var byId = {{}};
  data.spans.forEach(function(span) {{
    byId[span.spanId] = span;
    var key = span.parentSpanId && byId.hasOwnProperty(span.parentSpanId) ? span.parentSpanId : (span.parentSpanId || "__root__");
    (byParent[key] = byParent[key] || []).push(span);
  }});

  var aggTable = document.getElementById("aggregate-table");
  var agg = data.aggregate;
  var rows = [
    ["total cost (usd)", agg.total_cost_usd.toFixed(6)],
    ["input tokens", agg.total_input_tokens],
    ["output tokens", agg.total_output_tokens],
    ["avg api latency (ms)", agg.api_latency_ms_avg.toFixed(1)],
    ["total duration (ms)", agg.total_duration_ms.toFixed(1)],
  ];
  rows.forEach(function(row) {{
    var tr = document.createElement("tr");
    var th = document.createElement("th"); th.textContent = row[0];
    var td = document.createElement("td"); td.textContent = row[1];
    tr.appendChild(th); tr.appendChild(td);
    aggTable.appendChild(tr);
  }});

  function renderNode(span) {{
    var row = document.createElement("div");
    row.className = "span-row cat-" + span.category + (span.status === "ERROR" ? " status-ERROR" : "");
    row.textContent = span.name + "  (" + span.durationMs.toFixed(1) + "ms)";

    var childKey = span.spanId;
    var children = byParent[childKey] || [];
    var childContainer = document.createElement("div");
    childContainer.className = "children";
    children.forEach(function(child) {{
      childContainer.appendChild(renderNode(child));
    }});

    var wrapper = document.createElement("div");
    wrapper.className = "span-node";
    if (children.length > 0) {{
      row.addEventListener("click", function() {{
        childContainer.classList.toggle("open");
      }});
    }}
    wrapper.appendChild(row);
    wrapper.appendChild(childContainer);
    return wrapper;
  }}

  var tree = document.getElementById("tree");
  var roots = byParent["__root__"] || [];
  roots.forEach(function(root) {{
    tree.appendChild(renderNode(root));
  }});
}})();
</script>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_trace_core::tracer::Tracer;
    use cc_trace_core::Run;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn materialize_handles_a_missing_trace_file() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let path = materialize(&run.run_dir).unwrap();
        let html = fs::read_to_string(path).unwrap();
        assert!(html.contains("cc-trace report"));
    }

    #[test]
    fn materialize_builds_a_tree_from_a_real_run() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let sink = Arc::new(cc_trace_telemetry::writer::JsonlWriter::open(&run).unwrap());
        let tracer = Tracer::new(run.clone(), sink.clone());

        let api = tracer.start_api_span("POST", "https://api.anthropic.com/v1/messages");
        api.end();
        tracer.shutdown();

        let path = materialize(&run.run_dir).unwrap();
        let html = fs::read_to_string(path).unwrap();
        assert!(html.contains("__CC_TRACE_REPORT__"));
        assert!(html.contains("API POST"));
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        fs::write(run.trace_path(), "not json at all\n").unwrap();
        let path = materialize(&run.run_dir).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn multiple_top_level_spans_synthesize_a_root() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let writer = Arc::new(cc_trace_telemetry::writer::JsonlWriter::open(&run).unwrap());
        let attached_tracer = Tracer::attached(run.clone(), writer);

        let a = attached_tracer.start_hook_event_span("PreToolUse", Some("Bash"));
        a.end();
        let b = attached_tracer.start_hook_event_span("PostToolUse", Some("Bash"));
        b.end();

        let spans = read_spans(&run.trace_path()).unwrap();
        assert_eq!(spans.len(), 2);
        let (root, synthesized) = find_or_synthesize_root(&spans);
        assert!(root.is_some());
        assert!(synthesized);
    }

    #[test]
    fn materializing_twice_produces_byte_identical_html() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let writer = Arc::new(cc_trace_telemetry::writer::JsonlWriter::open(&run).unwrap());
        let attached_tracer = Tracer::attached(run.clone(), writer);
        let a = attached_tracer.start_hook_event_span("PreToolUse", Some("Bash"));
        a.end();
        let b = attached_tracer.start_hook_event_span("PostToolUse", Some("Bash"));
        b.end();

        let first = materialize(&run.run_dir).unwrap();
        let first_html = fs::read_to_string(&first).unwrap();
        let second = materialize(&run.run_dir).unwrap();
        let second_html = fs::read_to_string(&second).unwrap();
        assert_eq!(first_html, second_html);
    }
}
