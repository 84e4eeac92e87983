//! Tracer core.
//!
//! Owns the root session span and vends span constructors for the API,
//! Tool and Hook categories. Spans are not buffered until session end —
//! ending a span immediately hands it to the configured [`SpanSink`], which
//! the `telemetry` crate's JSONL writer implements. Keeping the sink
//! behind a trait here (instead of depending on `telemetry` directly)
//! avoids a crate cycle, since `telemetry`'s wire encoder depends on this
//! crate's [`Span`] type.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::run::Run;
use crate::span::{AttrValue, Span, SpanKind, SpanStatus};

/// Anything that can accept finished spans. Implemented by
/// `cc_trace_telemetry::writer::JsonlWriter`.
pub trait SpanSink: Send + Sync {
    fn export(&self, spans: Vec<Span>);
}

/// A sink that drops spans on the floor; useful for `--cc-no-trace` and
/// for tests that don't care about the written file.
pub struct NullSink;
impl SpanSink for NullSink {
    fn export(&self, _spans: Vec<Span>) {}
}

struct Inner {
    run: Run,
    sink: Arc<dyn SpanSink>,
    /// `Some` only in the OS process that owns the run's lifetime (the
    /// wrapper). Every other process that joins the run — a hook
    /// orchestrator invocation, since each participating OS process
    /// initializes its own tracer — attaches without a root: its
    /// top-level spans carry no `parentSpanId` at all rather than
    /// pointing at a root span that process never exported (a
    /// `parentSpanId` must refer to a span also emitted in the same run).
    /// The report materializer already handles multiple top-level spans
    /// by synthesizing a session root.
    root: Option<Span>,
}

/// Handle to an open span, returned by every constructor: a lightweight
/// wrapper holding the in-progress [`Span`] plus a handle back to the
/// tracer it will report to on [`end`](Self::end).
pub struct OpenSpan {
    span: Span,
    tracer: Tracer,
}

impl OpenSpan {
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.span.set_attr(key, value);
    }

    pub fn record_exception(&mut self, error: impl std::fmt::Display) {
        self.span.record_exception(error);
    }

    pub fn set_status(&mut self, status: SpanStatus, message: Option<String>) {
        self.span.set_status(status, message);
    }

    pub fn span_id_hex(&self) -> String {
        self.span.span_id.to_hex()
    }

    /// Ends the span and enqueues it to the writer immediately.
    pub fn end(mut self) {
        self.span.end();
        self.tracer.finish(self.span);
    }
}

/// Process-wide tracer state. One [`Tracer`] exists per OS
/// process participating in a run.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<Mutex<Inner>>,
}

impl Tracer {
    /// Creates the owning tracer for a run: constructs and, on
    /// [`shutdown`](Self::shutdown), exports the root "Session" span that
    /// every non-parented span in this process becomes a child of. Used
    /// exactly once per run, by the wrapper process.
    pub fn new(run: Run, sink: Arc<dyn SpanSink>) -> Self {
        let mut root = Span::new(run.trace_id, "Session", SpanKind::Internal);
        root.set_attr("session.id", run.session_id.clone());
        root.set_attr("run.id", run.run_id.clone());
        Self {
            inner: Arc::new(Mutex::new(Inner {
                run,
                sink,
                root: Some(root),
            })),
        }
    }

    /// Joins an already-running run without owning its root span. Used by the
    /// hook orchestrator.
    pub fn attached(run: Run, sink: Arc<dyn SpanSink>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                run,
                sink,
                root: None,
            })),
        }
    }

    pub fn root_span_id_hex(&self) -> Option<String> {
        self.inner.lock().unwrap().root.as_ref().map(|r| r.span_id.to_hex())
    }

    pub fn trace_id_hex(&self) -> String {
        self.inner.lock().unwrap().run.trace_id.to_hex()
    }

    pub fn run_id(&self) -> String {
        self.inner.lock().unwrap().run.run_id.clone()
    }

    /// Patches the session id on the still-open root span once discovered.
    /// Already-emitted spans keep the placeholder; spans
    /// constructed after this call inherit the corrected value. A no-op on
    /// an attached (non-owning) tracer beyond updating the spans it still
    /// has yet to create.
    pub fn adopt_session_id(&self, session_id: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        let session_id = session_id.into();
        inner.run.adopt_session_id(session_id.clone());
        if let Some(root) = inner.root.as_mut() {
            root.set_attr("session.id", session_id);
        }
    }

    fn new_child(&self, name: impl Into<String>, kind: SpanKind, parent: Option<&OpenSpan>) -> OpenSpan {
        let inner = self.inner.lock().unwrap();
        let mut span = Span::new(inner.run.trace_id, name, kind);
        span.parent_span_id = parent
            .map(|p| p.span.span_id)
            .or_else(|| inner.root.as_ref().map(|r| r.span_id));
        span.set_attr("session.id", inner.run.session_id.clone());
        drop(inner);
        OpenSpan {
            span,
            tracer: self.clone(),
        }
    }

    /// The proxy's entry point for a captured request: `API <METHOD> <url>`, kind CLIENT.
    pub fn start_api_span(&self, method: &str, url: &str) -> OpenSpan {
        let mut open = self.new_child(format!("API {method} {url}"), SpanKind::Client, None);
        open.set_attr("http.method", method);
        open.set_attr("http.url", url);
        open
    }

    /// A completed tool execution span.
    pub fn start_tool_span(
        &self,
        name: &str,
        input: &Value,
        mcp_server: Option<&str>,
        parent: Option<&OpenSpan>,
    ) -> OpenSpan {
        let mut open = self.new_child(name.to_string(), SpanKind::Internal, parent);
        open.set_attr("tool.name", name);
        open.set_attr(
            "tool.input",
            serde_json::to_string(input).unwrap_or_default(),
        );
        if let Some(server) = mcp_server {
            open.set_attr("mcp.server", server);
        }
        open
    }

    /// A hook-event span, `Hook: <event>` or `Hook: <event>[<toolName>]`.
    pub fn start_hook_event_span(&self, event: &str, tool_name: Option<&str>) -> OpenSpan {
        let name = match tool_name {
            Some(tool) => format!("Hook: {event}[{tool}]"),
            None => format!("Hook: {event}"),
        };
        let mut open = self.new_child(name, SpanKind::Internal, None);
        open.set_attr("hook.event", event);
        if let Some(tool) = tool_name {
            open.set_attr("tool.name", tool);
        }
        open
    }

    /// A single user-hook-command execution nested under a hook-event span.
    /// `exclusive` marks a command whose blocking response short-circuits
    /// the remaining hooks; recorded as an attribute so
    /// the report can distinguish the decisive hook from ones that ran to
    /// completion but had no say.
    pub fn start_hook_execution_span(
        &self,
        command: &str,
        parent: &OpenSpan,
        exclusive: bool,
    ) -> OpenSpan {
        let mut open = self.new_child(format!("Exec: {command}"), SpanKind::Internal, Some(parent));
        open.set_attr("hook.command", command);
        open.set_attr("hook.exclusive", exclusive);
        open
    }

    fn finish(&self, span: Span) {
        let inner = self.inner.lock().unwrap();
        inner.sink.export(vec![span]);
    }

    /// Ends the root span and flushes. A no-op for an attached tracer, which never owned a root
    /// to close.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        let Some(root) = inner.root.as_mut() else {
            return;
        };
        root.end();
        let root = root.clone();
        inner.sink.export(vec![root]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::Run;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct CollectingSink(StdMutex<Vec<Span>>);
    impl SpanSink for CollectingSink {
        fn export(&self, mut spans: Vec<Span>) {
            self.0.lock().unwrap().append(&mut spans);
        }
    }

    #[test]
    fn ending_a_span_enqueues_it_immediately() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let sink = Arc::new(CollectingSink(StdMutex::new(Vec::new())));
        let tracer = Tracer::new(run, sink.clone());

        let span = tracer.start_tool_span("read_file", &serde_json::json!({}), None, None);
        span.end();

        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn child_spans_inherit_root_as_parent_by_default() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let sink = Arc::new(NullSink);
        let tracer = Tracer::new(run, sink);
        let root_id = tracer.root_span_id_hex().unwrap();

        let span = tracer.start_api_span("POST", "https://api.anthropic.com/v1/messages");
        assert_eq!(span.span.parent_span_id.unwrap().to_hex(), root_id);
    }

    #[test]
    fn shutdown_emits_the_root_span() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let sink = Arc::new(CollectingSink(StdMutex::new(Vec::new())));
        let tracer = Tracer::new(run, sink.clone());
        tracer.shutdown();
        let exported = sink.0.lock().unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].name, "Session");
    }

    #[test]
    fn attached_tracer_has_no_root_and_top_level_spans_carry_no_parent() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let sink = Arc::new(CollectingSink(StdMutex::new(Vec::new())));
        let tracer = Tracer::attached(run, sink);
        assert!(tracer.root_span_id_hex().is_none());

        let span = tracer.start_hook_event_span("PostToolUse", Some("Bash"));
        assert!(span.span.parent_span_id.is_none());
    }

    #[test]
    fn attached_tracer_shutdown_exports_nothing() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let sink = Arc::new(CollectingSink(StdMutex::new(Vec::new())));
        let tracer = Tracer::attached(run, sink.clone());
        tracer.shutdown();
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn attached_tracer_shares_the_owning_tracers_trace_id() {
        let base = tempdir().unwrap();
        let run = Run::new(base.path()).unwrap();
        let run_id = run.run_id.clone();
        let owning = Tracer::new(run, Arc::new(NullSink));

        // Simulates a second OS process reconstructing the same Run from
        // the environment the wrapper published (core::run::Run::from_env
        // in production); trace_id is a pure function of run_id.
        let reconstructed = crate::run::Run {
            trace_id: crate::span::TraceId::from_seed(&run_id),
            run_id,
            session_id: "s".to_string(),
            run_dir: base.path().to_path_buf(),
            started_at: std::time::Instant::now(),
        };
        let attached = Tracer::attached(reconstructed, Arc::new(NullSink));
        assert_eq!(owning.trace_id_hex(), attached.trace_id_hex());
    }
}
