//! Host and supervisor configuration
//!
//! Plain structs with defaults. Binaries fill them from CLI flags; a few
//! settings can also come from the environment:
//!
//! - `TICKBRIDGE_PORT` - listener port (both sides)
//! - `TICKBRIDGE_HOST` - host executable the supervisor launches
//! - `TICKBRIDGE_PROJECT` - project directory, set on launched hosts

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::{HostAddress, DEFAULT_PORT};
use crate::lockfile;

pub const PORT_ENV: &str = "TICKBRIDGE_PORT";
pub const HOST_EXECUTABLE_ENV: &str = "TICKBRIDGE_HOST";
/// Set by the supervisor on hosts it launches
pub const PROJECT_ENV: &str = "TICKBRIDGE_PROJECT";

/// Host executable used when neither a flag nor `TICKBRIDGE_HOST` names one
pub const DEFAULT_HOST_EXECUTABLE: &str = "tickbridge-demo-host";

fn port_from_env() -> Option<u16> {
    let raw = std::env::var(PORT_ENV).ok()?;
    match raw.trim().parse() {
        Ok(port) => Some(port),
        Err(e) => {
            tracing::warn!("ignoring {PORT_ENV}={raw}: {e}");
            None
        }
    }
}

/// Best-effort absolute form of a project path, so that the host and the
/// supervisor derive the same address from `.` and `/abs/path`
pub fn resolve_project_dir(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    })
}

/// Configuration of the host side (listener + main loop)
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Working directory the host serves; the address token derives from it
    pub project_dir: PathBuf,
    /// Interface the listener binds to
    pub bind_ip: IpAddr,
    /// Listener port (0 picks a free port)
    pub port: u16,
    /// Whether `Quit` shuts the host down (batch mode) or is ignored
    pub allow_remote_quit: bool,
    /// Delay between main loop ticks for hosts driven by `Host::run_main_loop`
    pub tick_interval: Duration,
    /// Worker threads for the request server runtime
    pub server_threads: usize,
    /// How long shutdown waits for in-flight responses to be written
    pub shutdown_grace: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            allow_remote_quit: true,
            tick_interval: Duration::from_millis(16),
            server_threads: 2,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl HostConfig {
    pub fn for_project(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: resolve_project_dir(project_dir.as_ref()),
            ..Self::default()
        }
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Self {
        if let Some(port) = port_from_env() {
            self.port = port;
        }
        self
    }

    /// Absolute, symlink-free project directory; the address and lock derive from it
    pub fn project_root(&self) -> PathBuf {
        resolve_project_dir(&self.project_dir)
    }

    pub fn lock_path(&self) -> PathBuf {
        lockfile::lock_path(&self.project_root())
    }

    pub fn address(&self) -> HostAddress {
        HostAddress::for_project(&self.project_root(), self.port).with_ip(self.bind_ip)
    }
}

/// Bounded readiness polling after a launch
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Delay between failed probes
    pub interval: Duration,
    /// Failures tolerated before giving up; the attempt after the last
    /// tolerated failure is the final one
    pub max_failures: u32,
    /// Wait after the first success before confirming it
    pub settle_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_failures: 30,
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Command-line options forwarded to a launched host
#[derive(Debug, Clone, Default)]
pub struct HostLaunchOptions {
    /// Headless run; the host honours a remote `Quit`
    pub batch_mode: bool,
    pub nographics: bool,
    pub log_file: Option<PathBuf>,
    /// Passed through verbatim after the options above
    pub extra_args: Vec<String>,
}

impl HostLaunchOptions {
    pub fn to_args(&self, project_dir: &Path) -> Vec<String> {
        let mut args = Vec::new();
        if self.batch_mode {
            args.push("--batch-mode".to_string());
        }
        if self.nographics {
            args.push("--nographics".to_string());
        }
        args.push("--project-path".to_string());
        args.push(project_dir.display().to_string());
        if let Some(log_file) = &self.log_file {
            args.push("--log-file".to_string());
            args.push(log_file.display().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// Optional payload copied into the project before a launch
#[derive(Debug, Clone)]
pub struct PayloadStaging {
    pub source: PathBuf,
    /// Directory (relative to the project, or absolute) receiving the file
    pub destination_dir: PathBuf,
}

/// Configuration of the client supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub project_dir: PathBuf,
    pub port: u16,
    /// Host executable launched when no host is live
    pub host_executable: PathBuf,
    pub launch: HostLaunchOptions,
    pub poll: PollPolicy,
    pub connect_timeout: Duration,
    /// Overall timeout for an invocation; `None` waits as long as the procedure runs
    pub request_timeout: Option<Duration>,
    /// Send `Quit` after the invocation
    pub quit_after: bool,
    pub staging: Option<PayloadStaging>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            port: DEFAULT_PORT,
            host_executable: PathBuf::from(DEFAULT_HOST_EXECUTABLE),
            launch: HostLaunchOptions::default(),
            poll: PollPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: None,
            quit_after: false,
            staging: None,
        }
    }
}

impl SupervisorConfig {
    pub fn for_project(project_dir: impl AsRef<Path>) -> Self {
        Self {
            project_dir: resolve_project_dir(project_dir.as_ref()),
            ..Self::default()
        }
    }

    /// Apply environment overrides
    pub fn with_env(mut self) -> Self {
        if let Some(port) = port_from_env() {
            self.port = port;
        }
        if let Ok(executable) = std::env::var(HOST_EXECUTABLE_ENV) {
            if !executable.trim().is_empty() {
                self.host_executable = PathBuf::from(executable);
            }
        }
        self
    }

    /// Same resolution as [`HostConfig::project_root`]
    pub fn project_root(&self) -> PathBuf {
        resolve_project_dir(&self.project_dir)
    }

    pub fn lock_path(&self) -> PathBuf {
        lockfile::lock_path(&self.project_root())
    }

    pub fn address(&self) -> HostAddress {
        HostAddress::for_project(&self.project_root(), self.port)
    }
}
