//! OTLP-compatible span model shared by the tracer core and the writer.
//!
//! Field names mirror the OTLP JSON encoding directly so that
//! `telemetry::writer` can serialize a [`Span`] without an intermediate
//! mapping step.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 128-bit trace id, constant for every span emitted within one run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraceId(pub [u8; 16]);

/// 64-bit span id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpanId(pub [u8; 8]);

impl TraceId {
    pub fn new() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Derives a trace id deterministically from a run id. Every OS process participating in a run
    /// (the wrapper, each hook orchestrator invocation, each user hook)
    /// reconstructs its [`Run`](crate::run::Run) independently from
    /// environment variables alone, so the trace id can't be handed down
    /// through shared memory — it's recomputed from the one thing every
    /// process already agrees on, the run id.
    pub fn from_seed(seed: &str) -> Self {
        let h1 = fnv1a64(seed.as_bytes(), 0xcbf29ce484222325);
        let h2 = fnv1a64(seed.as_bytes(), 0x9e3779b97f4a7c15);
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&h1.to_be_bytes());
        bytes[8..].copy_from_slice(&h2.to_be_bytes());
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

/// FNV-1a, used only to derive deterministic span/trace ids from a seed
/// string; not a cryptographic hash and not meant to be one.
fn fnv1a64(data: &[u8], offset_basis: u64) -> u64 {
    let mut hash = offset_basis;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl SpanId {
    pub fn new() -> Self {
        let bytes = Uuid::new_v4();
        let mut out = [0u8; 8];
        out.copy_from_slice(&bytes.as_bytes()[..8]);
        Self(out)
    }

    /// Derives a span id deterministically from a seed string, the same way
    /// [`TraceId::from_seed`] does. Used for synthetic spans the report
    /// materializer invents:
    /// a random id there would make two materializations of the same JSONL
    /// differ byte-for-byte even though nothing in the run changed.
    pub fn from_seed(seed: &str) -> Self {
        let hash = fnv1a64(seed.as_bytes(), 0xcbf29ce484222325);
        Self(hash.to_be_bytes())
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self.to_hex())
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self.to_hex())
    }
}

/// Minimal hex encode/decode so this crate doesn't need an extra dependency
/// for something this small.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn decode(s: &str) -> Option<Vec<u8>> {
        if s.len() % 2 != 0 {
            return None;
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
            .collect()
    }
}

impl TryFrom<&str> for TraceId {
    type Error = ();
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(s).ok_or(())?;
        let arr: [u8; 16] = bytes.try_into().map_err(|_| ())?;
        Ok(Self(arr))
    }
}

impl TryFrom<&str> for SpanId {
    type Error = ();
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let bytes = hex::decode(s).ok_or(())?;
        let arr: [u8; 8] = bytes.try_into().map_err(|_| ())?;
        Ok(Self(arr))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanKind {
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// A single flat attribute value, matching OTLP's `AnyValue` union restricted
/// to the primitive kinds this requires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::String(v.to_string())
    }
}
impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::String(v)
    }
}
impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}
impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::Int(v as i64)
    }
}
impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Double(v)
    }
}
impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

/// The span category the report materializer buckets by. Derived, never
/// persisted as its own field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpanCategory {
    Api,
    Tool,
    Hook,
    File,
    Test,
    Other,
}

pub fn now_unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Span {
    #[serde(skip)]
    pub trace_id: TraceId,
    #[serde(skip)]
    pub span_id: SpanId,
    #[serde(skip)]
    pub parent_span_id: Option<SpanId>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time_unix_nano: u128,
    pub end_time_unix_nano: u128,
    pub attributes: BTreeMap<String, AttrValue>,
    pub status: SpanStatus,
    pub status_message: Option<String>,
}

impl Span {
    pub fn new(trace_id: TraceId, name: impl Into<String>, kind: SpanKind) -> Self {
        let start = now_unix_nanos();
        Self {
            trace_id,
            span_id: SpanId::new(),
            parent_span_id: None,
            name: name.into(),
            kind,
            start_time_unix_nano: start,
            end_time_unix_nano: start,
            attributes: BTreeMap::new(),
            status: SpanStatus::Unset,
            status_message: None,
        }
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn set_status(&mut self, status: SpanStatus, message: Option<String>) {
        self.status = status;
        self.status_message = message;
    }

    pub fn record_exception(&mut self, error: impl fmt::Display) {
        self.attributes.insert(
            "error".to_string(),
            AttrValue::String("true".to_string()),
        );
        self.attributes
            .insert("error.message".to_string(), AttrValue::String(error.to_string()));
    }

    pub fn end(&mut self) {
        self.end_time_unix_nano = now_unix_nanos();
    }

    pub fn duration_ms(&self) -> f64 {
        self.end_time_unix_nano
            .saturating_sub(self.start_time_unix_nano) as f64
            / 1_000_000.0
    }

    /// Derives the span's category from its name and attributes.
    /// Not stored on the wire; recomputed by anything that reads spans back,
    /// including the report materializer.
    pub fn category(&self) -> SpanCategory {
        if self.name.starts_with("API ") || self.attributes.contains_key("ai.model") {
            SpanCategory::Api
        } else if self.attributes.contains_key("tool.name")
            && self.attributes.contains_key("tool.duration.ms")
        {
            SpanCategory::Tool
        } else if self.name.starts_with("Hook:") || self.attributes.contains_key("hook.event") {
            SpanCategory::Hook
        } else if self.name.starts_with("File ") {
            SpanCategory::File
        } else if self.name.starts_with("Test ") {
            SpanCategory::Test
        } else {
            SpanCategory::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_id_round_trips_through_hex() {
        let id = TraceId::new();
        let hex = id.to_hex();
        let parsed = TraceId::try_from(hex.as_str()).unwrap();
        assert_eq!(id.0, parsed.0);
    }

    #[test]
    fn trace_id_from_seed_is_deterministic() {
        let a = TraceId::from_seed("run-123");
        let b = TraceId::from_seed("run-123");
        let c = TraceId::from_seed("run-456");
        assert_eq!(a.0, b.0);
        assert_ne!(a.0, c.0);
    }

    #[test]
    fn span_id_round_trips_through_hex() {
        let id = SpanId::new();
        let hex = id.to_hex();
        let parsed = SpanId::try_from(hex.as_str()).unwrap();
        assert_eq!(id.0, parsed.0);
    }

    #[test]
    fn category_detects_api_span() {
        let mut span = Span::new(TraceId::new(), "API POST /v1/messages", SpanKind::Client);
        span.set_attr("ai.model", "claude-test");
        assert_eq!(span.category(), SpanCategory::Api);
    }

    #[test]
    fn category_detects_tool_span() {
        let mut span = Span::new(TraceId::new(), "read_file", SpanKind::Internal);
        span.set_attr("tool.name", "read_file");
        span.set_attr("tool.duration.ms", 12.0);
        assert_eq!(span.category(), SpanCategory::Tool);
    }

    #[test]
    fn end_time_never_precedes_start_time() {
        let mut span = Span::new(TraceId::new(), "x", SpanKind::Internal);
        span.end();
        assert!(span.end_time_unix_nano >= span.start_time_unix_nano);
    }
}
