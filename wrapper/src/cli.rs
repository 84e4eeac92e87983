//! Command-line surface. Uses an external subcommand so host arguments
//! pass through untouched instead of being enumerated up front.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "cc-trace", author, version, about, long_about = None)]
pub struct Cli {
    /// Spawn the OS URL handler on the produced report once the run ends.
    #[arg(long)]
    pub cc_open: bool,

    /// Forward directly to the host binary with no interposition installed.
    #[arg(long)]
    pub cc_no_trace: bool,

    /// Suppress auto-open; only print the report path on exit.
    #[arg(long)]
    pub cc_report: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Invoked by the host CLI as its registered hook callback.
    Hook,
    /// Materializes `report.html` for an already-completed run.
    Report {
        /// Directory containing `trace.otlp.jsonl`.
        run_dir: PathBuf,
    },
    /// Prints the discovered host binary, run directory base, and whether
    /// the hook settings files parse cleanly.
    Doctor,
    /// Everything that isn't one of the above is the host binary and its
    /// own arguments, forwarded verbatim.
    #[command(external_subcommand)]
    Run(Vec<String>),
}
