//! Logging setup using tracing
//!
//! Both binaries log through `tracing`. The filter comes from `RUST_LOG`
//! (default `info,tickbridge=debug` when verbose, `info` otherwise), output is
//! plain text or JSON, and the host may redirect it to a log file.
//!
//! The subscriber also carries [`CaptureLayer`], so a procedure's own
//! `tracing` events reach its invocation's result.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::bridge::CaptureLayer;

/// How logs are rendered and where they go
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Force debug level regardless of `RUST_LOG`
    pub verbose: bool,
    /// Emit one JSON object per line
    pub json: bool,
    /// Append to this file instead of stderr
    pub file: Option<PathBuf>,
}

fn filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("info,tickbridge=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber
pub fn init(service_name: &str, options: &LogOptions) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry()
        .with(filter(options.verbose))
        .with(CaptureLayer);

    match (&options.file, options.json) {
        (Some(path), json) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let writer = Mutex::new(file);
            if json {
                registry
                    .with(fmt::layer().json().with_writer(writer))
                    .try_init()?;
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .try_init()?;
            }
        }
        (None, true) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
        (None, false) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init()?,
    }

    tracing::debug!(
        service = service_name,
        version = env!("CARGO_PKG_VERSION"),
        "logging initialized"
    );
    Ok(())
}
