//! `cc-trace` binary entry point. Ties together the run context, the
//! writer and tracer via `cc_trace_telemetry`/`cc_trace_core`, the
//! loopback proxy in [`proxy`], the hook orchestrator in [`hook`], and the
//! report materializer in [`report`]: the wrapper launches the host CLI
//! as a child with the interceptor preloaded, and on host exit signals
//! the tracer to close the root span and flush before the report
//! materializer produces the HTML report.

mod cli;
mod config;
mod hook;
mod logging;
mod proxy;
mod report;

use std::process::{ExitCode, Stdio};
use std::sync::Arc;

use cc_trace_core::run::ENV_OPEN_HTML;
use cc_trace_core::{Correlator, Run, RunError, Tracer};
use cc_trace_telemetry::writer::{JsonlWriter, WriterError};
use clap::Parser;
use config::ConfigError;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, info, warn};

use cli::{Cli, Command as CliCommand};
use proxy::ProxyError;
use report::ReportError;

#[derive(Debug, Error)]
enum WrapperError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Writer(#[from] WriterError),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error("failed to launch host binary {0}: {1}")]
    Spawn(std::path::PathBuf, std::io::Error),
}

#[actix_web::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(CliCommand::Hook) => {
            let code = hook::run().await;
            return ExitCode::from(code as u8);
        }
        Some(CliCommand::Report { run_dir }) => materialize_and_print(&run_dir),
        Some(CliCommand::Doctor) => doctor().await,
        Some(CliCommand::Run(host_args)) => run_session(host_args, cli.cc_open, cli.cc_no_trace, cli.cc_report).await,
        None => {
            eprintln!("cc-trace: no host command given (usage: cc-trace [flags] <host-args...>)");
            return ExitCode::from(1);
        }
    };

    match result {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("cc-trace: {err}");
            ExitCode::from(1)
        }
    }
}

/// Full session path. Returns the
/// exit code the process should use: the host's own code on a clean run, or
/// a wrapper-side code only for configuration failures.
async fn run_session(
    host_args: Vec<String>,
    cc_open: bool,
    cc_no_trace: bool,
    cc_report_only: bool,
) -> Result<i32, WrapperError> {
    let host_path = config::discover_host_binary(config::HOST_BINARY_NAME)?;

    if cc_no_trace {
        // No run directory, no interposition: the host's own exit code
        // forwarded verbatim.
        return exec_host_passthrough(&host_path, &host_args).await;
    }

    let logs_dir = config::logs_dir()?;
    let run = Run::new(&logs_dir)?;
    info!(run_id = %run.run_id, run_dir = %run.run_dir.display(), "cc-trace run starting");

    let writer = Arc::new(JsonlWriter::open(&run)?);
    let tracer = Tracer::new(run.clone(), writer.clone());
    let correlator = Arc::new(Correlator::with_sidecar(&run.run_dir));

    let upstream_base = config::upstream_base_url();
    let proxy_handle = proxy::start(tracer.clone(), correlator, upstream_base).await?;
    info!(addr = %proxy_handle.addr, "HTTP interceptor proxy listening");

    let mut env = run.publish_env(std::env::var(cc_trace_core::run::ENV_PARENT_SESSION).ok().as_deref());
    env.insert(
        config::HOST_BASE_URL_ENV.to_string(),
        format!("http://{}", proxy_handle.addr),
    );
    env.insert(ENV_OPEN_HTML.to_string(), cc_open.to_string());

    let spawn_result = Command::new(&host_path)
        .args(&host_args)
        .envs(&env)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn();

    let host_exit_code = match spawn_result {
        Ok(mut child) => match child.wait().await {
            Ok(status) => status.code().unwrap_or(1),
            Err(err) => {
                error!(%err, "failed to wait on host process");
                1
            }
        },
        Err(err) => return Err(WrapperError::Spawn(host_path, err)),
    };

    // Discover the real session id from whatever hook events landed in the
    // JSONL while the host ran, so the root span (and anything this process
    // still has buffered) gets corrected before shutdown.
    if let Some(session_id) = cc_trace_core::run::discover_session_id(&run.run_dir) {
        tracer.adopt_session_id(&session_id);
        writer.update_config(session_id, None);
    }

    tracer.shutdown();
    if let Err(err) = writer.shutdown() {
        warn!(%err, "failed to flush trace writer");
    }
    proxy_handle.stop().await;

    let report_path = report::materialize(&run.run_dir)?;
    if cc_open {
        open_in_browser(&report_path);
    } else if cc_report_only {
        println!("{}", report_path.display());
    } else {
        println!("cc-trace: report written to {}", report_path.display());
    }

    Ok(host_exit_code)
}

async fn exec_host_passthrough(host_path: &std::path::Path, host_args: &[String]) -> Result<i32, WrapperError> {
    let mut child = Command::new(host_path)
        .args(host_args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| WrapperError::Spawn(host_path.to_path_buf(), e))?;
    let status = child.wait().await.map_err(|e| WrapperError::Spawn(host_path.to_path_buf(), e))?;
    Ok(status.code().unwrap_or(1))
}

fn materialize_and_print(run_dir: &std::path::Path) -> Result<i32, WrapperError> {
    let path = report::materialize(run_dir)?;
    println!("{}", path.display());
    Ok(0)
}

/// `cc-trace doctor`: a single-line pass/fail diagnostic per
/// startup-validation check.
async fn doctor() -> Result<i32, WrapperError> {
    let mut ok = true;

    match config::discover_host_binary(config::HOST_BINARY_NAME) {
        Ok(path) => println!("host binary: ok ({})", path.display()),
        Err(err) => {
            println!("host binary: FAIL ({err})");
            ok = false;
        }
    }

    match config::logs_dir() {
        Ok(dir) => match std::fs::create_dir_all(&dir) {
            Ok(()) => println!("run directory: ok ({})", dir.display()),
            Err(err) => {
                println!("run directory: FAIL ({err})");
                ok = false;
            }
        },
        Err(err) => {
            println!("run directory: FAIL ({err})");
            ok = false;
        }
    }

    let base_url = config::upstream_base_url();
    match probe_ai_base_url(&base_url).await {
        Ok(status) => println!("AI base URL: ok ({base_url}, HTTP {status})"),
        Err(err) => {
            println!("AI base URL: FAIL ({base_url}, {err})");
            ok = false;
        }
    }

    Ok(if ok { 0 } else { 1 })
}

/// Performs a short-timeout `HEAD` request against `base_url` to confirm
/// the configured AI provider endpoint is reachable. Any HTTP status back
/// (even 4xx/5xx) counts as reachable — `doctor` is checking connectivity,
/// not authentication or routing.
async fn probe_ai_base_url(base_url: &str) -> Result<u16, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;
    let response = client.head(base_url).send().await?;
    Ok(response.status().as_u16())
}

fn open_in_browser(path: &std::path::Path) {
    #[cfg(target_os = "macos")]
    let opener = "open";
    #[cfg(target_os = "linux")]
    let opener = "xdg-open";
    #[cfg(target_os = "windows")]
    let opener = "start";

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
    {
        if let Err(err) = std::process::Command::new(opener).arg(path).spawn() {
            warn!(%err, "failed to spawn OS URL handler for report");
            println!("cc-trace: report written to {}", path.display());
        }
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        println!("cc-trace: report written to {}", path.display());
    }
}
