//! tickbridge - run a procedure inside a project's host, starting the host if needed
//!
//! Prints the procedure's log, then `Success` or `Failed`. Exit codes:
//!
//! | code | meaning |
//! |------|---------|
//! | 0  | success |
//! | 1  | the procedure ran and failed |
//! | 2  | transport or protocol failure |
//! | 3  | host never became reachable |
//! | 4  | host launch or payload staging failed |
//! | 64 | usage error |

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use tickbridge::logging::{self, LogOptions};
use tickbridge::{
    HostLaunchOptions, PayloadStaging, PollPolicy, Supervisor, SupervisorConfig, SupervisorError,
};

mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const UNEXPECTED_FAILURE: u8 = 2;
    pub const USAGE: u8 = 64;
}

#[derive(Debug, Parser)]
#[command(name = "tickbridge", version, about)]
struct Cli {
    /// Project directory the host serves
    #[arg(long, value_name = "DIR", default_value = ".")]
    project_path: PathBuf,

    /// Fully-qualified name of the procedure to run
    #[arg(long, value_name = "NAME")]
    execute_method: Option<String>,

    /// Ask the host to exit after the invocation
    #[arg(long)]
    quit: bool,

    /// Launch the host headless; such a host honours --quit
    #[arg(long)]
    batch_mode: bool,

    #[arg(long)]
    nographics: bool,

    /// Log file for a launched host
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Host executable to launch (default: $TICKBRIDGE_HOST or tickbridge-demo-host)
    #[arg(long, value_name = "PATH")]
    host: Option<PathBuf>,

    /// Extra argument for a launched host (repeatable)
    #[arg(long = "host-arg", value_name = "ARG", allow_hyphen_values = true)]
    host_args: Vec<String>,

    /// Host port (default: $TICKBRIDGE_PORT or 13711)
    #[arg(long)]
    port: Option<u16>,

    /// Delay between readiness probes, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Failed readiness probes tolerated before giving up
    #[arg(long, default_value_t = 30)]
    max_failures: u32,

    /// Wait after the first successful probe before trusting it, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    settle_ms: u64,

    #[arg(long, value_name = "SECS", default_value_t = 5)]
    connect_timeout_secs: u64,

    /// Give up on an invocation after this many seconds (default: wait forever)
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Payload file copied into the project before launching a host
    #[arg(long, value_name = "FILE")]
    stage: Option<PathBuf>,

    /// Directory under the project that receives the staged payload
    #[arg(long, value_name = "DIR", default_value = "Plugins", requires = "stage")]
    stage_dir: PathBuf,

    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json: bool,
}

fn build_config(cli: &Cli) -> anyhow::Result<SupervisorConfig> {
    anyhow::ensure!(
        cli.project_path.is_dir(),
        "project path {} is not a directory",
        cli.project_path.display()
    );
    let mut config = SupervisorConfig::for_project(&cli.project_path).with_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = &cli.host {
        config.host_executable = host.clone();
    }
    config.launch = HostLaunchOptions {
        batch_mode: cli.batch_mode,
        nographics: cli.nographics,
        log_file: cli.log_file.clone(),
        extra_args: cli.host_args.clone(),
    };
    config.poll = PollPolicy {
        interval: Duration::from_millis(cli.poll_interval_ms),
        max_failures: cli.max_failures,
        settle_delay: Duration::from_millis(cli.settle_ms),
    };
    config.connect_timeout = Duration::from_secs(cli.connect_timeout_secs);
    config.request_timeout = cli.timeout_secs.map(Duration::from_secs);
    config.quit_after = cli.quit;
    if let Some(source) = &cli.stage {
        let source = std::fs::canonicalize(source)
            .with_context(|| format!("payload {} not found", source.display()))?;
        config.staging = Some(PayloadStaging {
            source,
            destination_dir: cli.stage_dir.clone(),
        });
    }
    Ok(config)
}

fn print_log(log: &str) {
    if !log.is_empty() {
        println!("{log}");
    }
}

async fn run(cli: Cli) -> u8 {
    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return exit_codes::USAGE;
        }
    };

    let supervisor = match Supervisor::new(config) {
        Ok(supervisor) => supervisor,
        Err(e) => {
            eprintln!("Error: {e}");
            return exit_codes::UNEXPECTED_FAILURE;
        }
    };
    tracing::debug!(url = %supervisor.address().url(), "resolved host address");

    match supervisor.run(cli.execute_method.as_deref()).await {
        Ok(report) => {
            if let Some(reply) = &report.reply {
                print_log(&reply.body);
            }
            println!("Success");
            exit_codes::SUCCESS
        }
        Err(e) => {
            if let SupervisorError::Invocation { log, .. } = &e {
                print_log(log);
            }
            eprintln!("Error: {e}");
            eprintln!("Failed");
            e.exit_code()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(if e.use_stderr() {
                exit_codes::USAGE
            } else {
                exit_codes::SUCCESS
            });
        }
    };

    let options = LogOptions {
        verbose: cli.verbose,
        json: cli.json,
        file: None,
    };
    if let Err(e) = logging::init("tickbridge", &options) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::from(exit_codes::UNEXPECTED_FAILURE);
    }

    ExitCode::from(run(cli).await)
}
