//! tickbridge-demo-host - a minimal host application
//!
//! Runs a fixed-rate main loop and exposes a handful of procedures:
//!
//! - `Demo.Method` - logs one line
//! - `Demo.LongRunning` - logs a line per step for a while
//! - `Demo.LogTest` - logs at log, warning and error level (so it fails)
//! - `Demo.ThrowTest` - panics
//! - `Demo.Fail` - returns an error
//! - `Demo.Count` - logs how many times it has been called

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use tickbridge::logging::{self, LogOptions};
use tickbridge::{Host, HostConfig, Registry};

const LONG_RUNNING_STEPS: u32 = 30;

#[derive(Debug, Parser)]
#[command(name = "tickbridge-demo-host", version, about)]
struct Args {
    /// Project directory to serve
    #[arg(long, value_name = "DIR", env = "TICKBRIDGE_PROJECT", default_value = ".")]
    project_path: PathBuf,

    /// Headless mode: a remote `Quit` stops the host
    #[arg(long)]
    batch_mode: bool,

    /// Accepted for compatibility; the demo host never renders
    #[arg(long)]
    nographics: bool,

    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Listener port (default: $TICKBRIDGE_PORT or 13711)
    #[arg(long)]
    port: Option<u16>,

    /// Main loop period in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 16)]
    tick_ms: u64,

    /// Duration of one `Demo.LongRunning` step in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    long_running_step_ms: u64,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    json: bool,
}

fn demo_registry(step: Duration) -> Registry {
    let mut registry = Registry::new();
    let mut calls: u64 = 0;

    registry
        .register("Demo.Method", |log| {
            log.log("Test method");
            Ok(())
        })
        .register("Demo.LongRunning", move |log| {
            for i in 0..LONG_RUNNING_STEPS {
                log.log(format!("Tick: {i}"));
                std::thread::sleep(step);
            }
            Ok(())
        })
        .register("Demo.LogTest", |log| {
            log.log("Level: 'LogMessage'");
            log.warning("Level: 'Warning'");
            log.error("Level: 'Error'");
            Ok(())
        })
        .register("Demo.ThrowTest", |_| panic!("Test exception"))
        .register("Demo.Fail", |_| anyhow::bail!("requested failure"))
        .register("Demo.Count", move |log| {
            calls += 1;
            log.log(format!("Called {calls} times"));
            Ok(())
        });
    registry
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init(
        "tickbridge-demo-host",
        &LogOptions {
            verbose: args.verbose,
            json: args.json,
            file: args.log_file.clone(),
        },
    )?;
    if args.nographics {
        tracing::debug!("--nographics has no effect on the demo host");
    }

    let mut config = HostConfig::for_project(&args.project_path).with_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    config.allow_remote_quit = args.batch_mode;
    config.tick_interval = Duration::from_millis(args.tick_ms);

    let host = Host::start(config).context("failed to start host")?;
    host.quit_on_ctrl_c();

    let mut registry = demo_registry(Duration::from_millis(args.long_running_step_ms));
    let procedures: Vec<&str> = registry.names().collect();
    tracing::info!(?procedures, "host ready");

    host.run_main_loop(&mut registry, || {});
    host.shutdown();
    Ok(())
}
