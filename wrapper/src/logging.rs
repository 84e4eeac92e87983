//! Diagnostic logging for the wrapper's own operation, as distinct from the
//! OTLP trace it produces for the host session. Just the `tracing_subscriber`
//! fmt layer: this system hand-builds its own JSONL writer
//! (`cc_trace_telemetry`) instead of bridging through the `tracing`/OTel SDK,
//! so there's no exporter layer to wire up here.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes a stderr logger honoring `RUST_LOG`, defaulting to `info`.
/// Wrapper diagnostics and host-process stdout/stderr are kept separate:
/// this only ever writes to the wrapper's own stderr, never to the stream
/// being teed to the host's terminal.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::IsTerminal::is_terminal(&std::io::stderr()))
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
