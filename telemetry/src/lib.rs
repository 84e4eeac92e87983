//! OTLP JSON wire encoding and the append-only JSONL writer.

pub mod otlp;
pub mod writer;

pub use otlp::{encode_batch, flatten_spans, OtlpDocument, WireSpan};
pub use writer::{JsonlWriter, WriterError};
