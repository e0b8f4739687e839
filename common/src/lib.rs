//! Directory synchronization engine for FTP servers
//!
//! The engine turns raw `LIST` output into typed entries, walks remote trees level by level,
//! diffs them against a local tree through include/exclude masks and executes the resulting
//! plan with a bounded number of concurrent requests.
//!
//! # Layout
//!
//! - [`listing`] detects the listing style of a batch and parses Unix-style and Windows-style
//!   lines into [`entry::Entry`] values
//! - [`walk`] expands a remote directory breadth first
//! - [`mask`] decides which relative paths take part in a run
//! - [`plan`] orders the work so directories exist before their contents and are removed after
//! - [`transfer`] runs planned items behind an admission gate
//! - [`ops`] wires all of the above into put, get and delete runs against a [`transport::Transport`]
//!
//! The FTP control and data channels themselves are not part of this crate. Callers provide
//! them through [`transport::Transport`].
//!
//! # Logging
//!
//! Everything logs through `tracing`. Binaries call [`init_tracing`] (or [`run`], which does it
//! for them) with an [`OutputConfig`]:
//!
//! - `verbose` 0 = ERROR, 1 = INFO, 2 = DEBUG, 3 = TRACE
//! - `quiet` turns logging off entirely
//!
//! `RUST_LOG` overrides the verbosity when set.

pub mod config;
pub mod entry;
pub mod error;
pub mod listing;
pub mod local;
pub mod mask;
pub mod ops;
pub mod plan;
pub mod progress;
pub mod transfer;
pub mod transport;
pub mod walk;

#[cfg(test)]
pub mod testutils;

pub use config::OutputConfig;
pub use config::SyncConfig;
pub use entry::Entry;
pub use error::Error;
pub use ops::Session;

/// Install the global `tracing` subscriber for a binary.
pub fn init_tracing(output: &OutputConfig) -> anyhow::Result<()> {
    let level = if output.quiet {
        "off"
    } else {
        match output.verbose {
            0 => "error",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .try_init()
        .map_err(|err| anyhow::anyhow!("{err}"))?;
    Ok(())
}

/// Run `func` on a fresh tokio runtime with logging set up, returning its summary.
///
/// Errors are logged rather than returned; `None` tells the caller to exit with failure.
/// With `print_summary` set the summary is printed to stdout on success.
pub fn run<Fut, Summary, Error>(
    output: &OutputConfig,
    max_workers: usize,
    func: impl FnOnce() -> Fut,
) -> Option<Summary>
where
    Summary: std::fmt::Display,
    Error: std::fmt::Display,
    Fut: std::future::Future<Output = Result<Summary, Error>>,
{
    if let Err(error) = init_tracing(output) {
        eprintln!("failed to initialize logging: {error:#}");
        return None;
    }
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if max_workers > 0 {
        builder.worker_threads(max_workers);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!("failed to start runtime: {}", error);
            return None;
        }
    };
    match runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary || output.verbose > 0 {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                tracing::error!("{:#}", error);
            }
            None
        }
    }
}
