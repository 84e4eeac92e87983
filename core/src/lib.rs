//! Shared run/span/pricing model and cross-cutting trace logic used by both
//! the telemetry writer and the wrapper binary.

pub mod correlator;
pub mod hooksettings;
pub mod metrics;
pub mod pricing;
pub mod run;
pub mod span;
pub mod tracer;

pub use correlator::Correlator;
pub use metrics::RunAggregate;
pub use run::{Run, RunError};
pub use span::{AttrValue, Span, SpanCategory, SpanKind, SpanStatus, TraceId};
pub use tracer::{NullSink, OpenSpan, SpanSink, Tracer};
