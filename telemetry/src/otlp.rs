//! OTLP JSON wire encoding.
//!
//! Hand-rolled rather than pulled from the OTel SDK: this already directs
//! the wrapper away from the full `opentelemetry`/`tonic` gRPC exporter stack
//! toward a hand-built JSONL sink, so there's no `ResourceSpans` protobuf
//! message to reuse — only its JSON shape, which is small enough to encode
//! directly with `serde`.

use std::fmt;

use cc_trace_core::{AttrValue, Span, SpanKind, SpanStatus};
use serde::de::{self, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// A nanosecond timestamp encoded as a decimal string on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NanoString(pub u128);

impl Serialize for NanoString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for NanoString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct V;
        impl<'de> Visitor<'de> for V {
            type Value = NanoString;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal string of nanoseconds")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<NanoString, E> {
                v.parse::<u128>()
                    .map(NanoString)
                    .map_err(|_| de::Error::custom("invalid nanosecond timestamp"))
            }
            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NanoString, E> {
                Ok(NanoString(v as u128))
            }
        }
        deserializer.deserialize_any(V)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireAttribute {
    pub key: String,
    pub value: WireValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireValue {
    #[serde(rename = "stringValue", skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    #[serde(rename = "intValue", skip_serializing_if = "Option::is_none")]
    pub int_value: Option<String>,
    #[serde(rename = "doubleValue", skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    #[serde(rename = "boolValue", skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
}

impl From<&AttrValue> for WireValue {
    fn from(v: &AttrValue) -> Self {
        let mut out = WireValue {
            string_value: None,
            int_value: None,
            double_value: None,
            bool_value: None,
        };
        match v {
            AttrValue::String(s) => out.string_value = Some(s.clone()),
            // Encoded as a string per the OTLP JSON mapping for 64-bit ints.
            AttrValue::Int(i) => out.int_value = Some(i.to_string()),
            AttrValue::Double(d) => out.double_value = Some(*d),
            AttrValue::Bool(b) => out.bool_value = Some(*b),
        }
        out
    }
}

impl WireValue {
    fn into_attr_value(self) -> Option<AttrValue> {
        if let Some(s) = self.string_value {
            return Some(AttrValue::String(s));
        }
        if let Some(i) = self.int_value {
            return i.parse::<i64>().ok().map(AttrValue::Int);
        }
        if let Some(d) = self.double_value {
            return Some(AttrValue::Double(d));
        }
        if let Some(b) = self.bool_value {
            return Some(AttrValue::Bool(b));
        }
        None
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WireKind {
    Internal,
    Client,
    Server,
    Producer,
    Consumer,
}

impl From<SpanKind> for WireKind {
    fn from(k: SpanKind) -> Self {
        match k {
            SpanKind::Internal => WireKind::Internal,
            SpanKind::Client => WireKind::Client,
            SpanKind::Server => WireKind::Server,
            SpanKind::Producer => WireKind::Producer,
            SpanKind::Consumer => WireKind::Consumer,
        }
    }
}

impl From<WireKind> for SpanKind {
    fn from(k: WireKind) -> Self {
        match k {
            WireKind::Internal => SpanKind::Internal,
            WireKind::Client => SpanKind::Client,
            WireKind::Server => SpanKind::Server,
            WireKind::Producer => SpanKind::Producer,
            WireKind::Consumer => SpanKind::Consumer,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WireStatusCode {
    Unset,
    Ok,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireStatus {
    pub code: WireStatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireSpan {
    #[serde(rename = "traceId")]
    pub trace_id: String,
    #[serde(rename = "spanId")]
    pub span_id: String,
    #[serde(rename = "parentSpanId", skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: WireKind,
    #[serde(rename = "startTimeUnixNano")]
    pub start_time_unix_nano: NanoString,
    #[serde(rename = "endTimeUnixNano")]
    pub end_time_unix_nano: NanoString,
    #[serde(default, serialize_with = "serialize_attrs", deserialize_with = "deserialize_attrs")]
    pub attributes: Vec<WireAttribute>,
    pub status: WireStatus,
}

fn serialize_attrs<S: Serializer>(attrs: &[WireAttribute], s: S) -> Result<S::Ok, S::Error> {
    let mut seq = s.serialize_seq(Some(attrs.len()))?;
    for attr in attrs {
        seq.serialize_element(attr)?;
    }
    seq.end()
}

fn deserialize_attrs<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<WireAttribute>, D::Error> {
    Vec::<WireAttribute>::deserialize(d)
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireScopeSpans {
    #[serde(default)]
    pub scope: WireScope,
    pub spans: Vec<WireSpan>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WireResource {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<WireAttribute>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireResourceSpans {
    #[serde(default)]
    pub resource: WireResource,
    #[serde(rename = "scopeSpans")]
    pub scope_spans: Vec<WireScopeSpans>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OtlpDocument {
    #[serde(rename = "resourceSpans")]
    pub resource_spans: Vec<WireResourceSpans>,
}

/// The scope name stamped on every emitted batch, used by report tooling to
/// tell apart cc-trace's own spans from any other OTLP source sharing a
/// directory.
pub const SCOPE_NAME: &str = "cc-trace";

fn encode_span(span: &Span) -> WireSpan {
    let attributes = span
        .attributes
        .iter()
        .map(|(k, v)| WireAttribute {
            key: k.clone(),
            value: v.into(),
        })
        .collect();
    WireSpan {
        trace_id: span.trace_id.to_hex(),
        span_id: span.span_id.to_hex(),
        parent_span_id: span.parent_span_id.map(|id| id.to_hex()),
        name: span.name.clone(),
        kind: span.kind.into(),
        start_time_unix_nano: NanoString(span.start_time_unix_nano),
        end_time_unix_nano: NanoString(span.end_time_unix_nano),
        attributes,
        status: WireStatus {
            code: match span.status {
                SpanStatus::Unset => WireStatusCode::Unset,
                SpanStatus::Ok => WireStatusCode::Ok,
                SpanStatus::Error => WireStatusCode::Error,
            },
            message: span.status_message.clone(),
        },
    }
}

/// Encodes a batch of spans into one `ResourceSpans` document, one line of
/// the JSONL file.
pub fn encode_batch(spans: &[Span]) -> OtlpDocument {
    let wire_spans = spans.iter().map(encode_span).collect();
    OtlpDocument {
        resource_spans: vec![WireResourceSpans {
            resource: WireResource::default(),
            scope_spans: vec![WireScopeSpans {
                scope: WireScope {
                    name: Some(SCOPE_NAME.to_string()),
                },
                spans: wire_spans,
            }],
        }],
    }
}

/// Flattens every span out of a parsed document, in file order.
pub fn flatten_spans(doc: &OtlpDocument) -> Vec<&WireSpan> {
    doc.resource_spans
        .iter()
        .flat_map(|rs| rs.scope_spans.iter())
        .flat_map(|ss| ss.spans.iter())
        .collect()
}

pub fn wire_value_as_json(value: &WireValue) -> Value {
    if let Some(s) = &value.string_value {
        return Value::String(s.clone());
    }
    if let Some(i) = &value.int_value {
        return Value::String(i.clone());
    }
    if let Some(d) = value.double_value {
        return serde_json::json!(d);
    }
    if let Some(b) = value.bool_value {
        return Value::Bool(b);
    }
    Value::Null
}

pub fn wire_value_into_attr(value: WireValue) -> Option<AttrValue> {
    value.into_attr_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cc_trace_core::{SpanKind as CoreKind, TraceId};

    #[test]
    fn encodes_timestamps_as_decimal_strings() {
        let span = Span::new(TraceId::new(), "x", CoreKind::Internal);
        let doc = encode_batch(&[span]);
        let json = serde_json::to_value(&doc).unwrap();
        let start = &json["resourceSpans"][0]["scopeSpans"][0]["spans"][0]["startTimeUnixNano"];
        assert!(start.is_string());
    }

    #[test]
    fn round_trips_through_json() {
        let mut span = Span::new(TraceId::new(), "API GET /v1/messages", CoreKind::Client);
        span.set_attr("http.method", "GET");
        span.set_attr("ai.tokens.input", 42i64);
        let doc = encode_batch(&[span]);
        let json = serde_json::to_string(&doc).unwrap();
        let parsed: OtlpDocument = serde_json::from_str(&json).unwrap();
        let flat = flatten_spans(&parsed);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].name, "API GET /v1/messages");
    }

    #[test]
    fn flatten_concatenates_across_resource_spans() {
        let a = encode_batch(&[Span::new(TraceId::new(), "a", CoreKind::Internal)]);
        let b = encode_batch(&[Span::new(TraceId::new(), "b", CoreKind::Internal)]);
        let mut doc = a;
        doc.resource_spans.extend(b.resource_spans);
        assert_eq!(flatten_spans(&doc).len(), 2);
    }
}
