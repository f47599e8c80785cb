//! tickbridge - call named procedures inside a running host's main loop
//!
//! A host application with a single-threaded, cooperatively scheduled main
//! loop embeds a [`Host`]. Remote callers POST a procedure name to the host's
//! address; the host runs it on its next tick and replies with everything the
//! procedure logged. The `tickbridge` binary is the client side: it starts a
//! host for a project if none is running, invokes one procedure, and reports
//! the result through its exit code.
//!
//! # Modules
//!
//! - `bridge` - command queue, log sink, and the per-tick executor
//! - `server` - HTTP listener feeding the bridge
//! - `host` - lock + listener + main loop glue for host applications
//! - `supervisor` - launch-or-call client, readiness polling, payload staging
//! - `address` - per-project endpoint tokens
//! - `lockfile` - host liveness lock
//! - `config` - host and supervisor settings
//! - `metrics` - Prometheus metrics
//! - `logging` - tracing subscriber setup
//!
//! # Quick Start
//!
//! ```ignore
//! use tickbridge::{Supervisor, SupervisorConfig};
//!
//! let supervisor = Supervisor::new(SupervisorConfig::for_project("/work/game"))?;
//! let report = supervisor.run(Some("Build.Player")).await?;
//! ```

pub mod address;
pub mod bridge;
pub mod config;
pub mod host;
pub mod lockfile;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod supervisor;

// Re-export commonly used types at crate root for convenience
pub use address::HostAddress;
pub use bridge::{Bridge, CommandOutcome, Invoker, LogEntry, LogSink, Registry, Severity, Tick};
pub use config::{HostConfig, HostLaunchOptions, PayloadStaging, PollPolicy, SupervisorConfig};
pub use host::{Host, HostError};
pub use supervisor::{RunReport, Supervisor, SupervisorError};
