//! Append-only JSONL writer.
//!
//! Implements [`cc_trace_core::SpanSink`] so the tracer core can hand off
//! finished spans without depending on this crate. One [`JsonlWriter`] is
//! constructed per OS process participating in a run; coordination across
//! processes happens purely through the shared file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cc_trace_core::{Run, Span, SpanSink};
use fs2::FileExt;
use thiserror::Error;

use crate::otlp::encode_batch;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("run directory for {0} is not writable: {1}")]
    IoError(PathBuf, std::io::Error),
}

struct State {
    file: File,
    session_id: String,
    parent_session_id: Option<String>,
}

/// Appends OTLP batches to `<runDir>/trace.otlp.jsonl`.
pub struct JsonlWriter {
    state: Mutex<State>,
}

impl JsonlWriter {
    pub fn open(run: &Run) -> Result<Self, WriterError> {
        let path = run.trace_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WriterError::IoError(path.clone(), e))?;
        Ok(Self {
            state: Mutex::new(State {
                file,
                session_id: run.session_id.clone(),
                parent_session_id: None,
            }),
        })
    }

    /// Patches the session id (and, when recursively invoked, the parent
    /// session id) stamped onto every span exported after this call.
    pub fn update_config(&self, session_id: impl Into<String>, parent_session_id: Option<String>) {
        let mut state = self.state.lock().unwrap();
        state.session_id = session_id.into();
        state.parent_session_id = parent_session_id;
    }

    fn export_inner(&self, mut spans: Vec<Span>) -> Result<(), WriterError> {
        let mut state = self.state.lock().unwrap();
        for span in &mut spans {
            span.set_attr("session.id", state.session_id.clone());
            if let Some(parent) = &state.parent_session_id {
                span.set_attr("parent.session.id", parent.clone());
            }
        }

        let doc = encode_batch(&spans);
        let mut line = match serde_json::to_string(&doc) {
            Ok(line) => line,
            Err(_) => degrade_and_encode(spans),
        };
        line.push('\n');

        // The line is assembled in memory and written in one syscall so the
        // append is atomic even against other OS processes appending to the
        // same file concurrently. The exclusive lock is the
        // belt-and-suspenders case for filesystems or batch sizes where a
        // single write_all isn't guaranteed atomic.
        state
            .file
            .lock_exclusive()
            .map_err(|e| WriterError::IoError(PathBuf::new(), e))?;
        let result = state.file.write_all(line.as_bytes());
        let _ = FileExt::unlock(&state.file);
        result.map_err(|e| WriterError::IoError(PathBuf::new(), e))
    }

    /// Flushes and closes out the writer at process exit.
    pub fn shutdown(&self) -> Result<(), WriterError> {
        let mut state = self.state.lock().unwrap();
        state
            .file
            .flush()
            .map_err(|e| WriterError::IoError(PathBuf::new(), e))
    }
}

/// Serialization of the batch as a whole failed (should only happen for a
/// span whose attribute map somehow holds non-finite floats). Rather than
/// drop the whole batch, each span is re-encoded individually and any span
/// that still fails is replaced with a minimal span carrying a degraded
/// error marker.
fn degrade_and_encode(spans: Vec<Span>) -> String {
    let mut salvaged = Vec::with_capacity(spans.len());
    for mut span in spans {
        if serde_json::to_string(&encode_batch(std::slice::from_ref(&span))).is_err() {
            span.attributes.clear();
            span.set_attr("telemetry.degraded", true);
            span.set_attr("telemetry.degraded.reason", "serialization_failure");
        }
        salvaged.push(span);
    }
    serde_json::to_string(&encode_batch(&salvaged)).unwrap_or_else(|_| {
        // Every remaining field is now a plain string/bool/int; this branch
        // is unreachable in practice but kept so `export` stays infallible.
        "{\"resourceSpans\":[]}".to_string()
    })
}

impl SpanSink for JsonlWriter {
    fn export(&self, spans: Vec<Span>) {
        if let Err(err) = self.export_inner(spans) {
            tracing::error!(?err, "failed to append spans to trace log");
        }
    }
}

pub fn trace_file_path(run_dir: &Path) -> PathBuf {
    run_dir.join(cc_trace_core::run::TRACE_FILE_NAME)
}
