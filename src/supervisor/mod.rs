//! Process Supervisor - make sure a host is running, then call it
//!
//! ```text
//! lock held? ──no──► stage payload ──► launch host ──► poll status (bounded)
//!     │                                                      │
//!    yes ◄───────────────────────────────────────────────────┘
//!     ▼
//! POST procedure ──► result body ──► (optional) POST Quit
//! ```
//!
//! The readiness poll is the only place anything is retried. A failed
//! invocation or transport error is reported once.

pub mod client;
pub mod launcher;
pub mod readiness;

use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::Mutex;

use thiserror::Error;
use uuid::Uuid;

pub use client::{HostClient, InvocationReply};
pub use launcher::{launch_host, stage_payload};
pub use readiness::{wait_until_ready, ReadyReport, StatusProbe};

use crate::address::HostAddress;
use crate::bridge::QUIT_COMMAND;
use crate::config::SupervisorConfig;
use crate::lockfile;

/// Everything that can go wrong on the client side
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Host never answered the status probe within the poll budget
    #[error("host did not become reachable after {attempts} attempts")]
    StartupTimeout { attempts: u32 },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Host ran the procedure and classified it as failed
    #[error("procedure `{procedure}` failed (HTTP {status})")]
    Invocation {
        procedure: String,
        status: u16,
        /// Newline-joined log lines returned by the host
        log: String,
    },

    /// Unexpected status or body shape
    #[error("unexpected response from host: {0}")]
    Protocol(String),

    #[error("failed to launch {}: {source}", executable.display())]
    Launch {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("host process exited before it became reachable ({status})")]
    HostExited { status: ExitStatus },

    #[error("failed to stage payload {}: {source}", path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SupervisorError {
    /// Protocol mismatches count as transport failures
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SupervisorError::Transport { .. } | SupervisorError::Protocol(_)
        )
    }

    /// Errors that end readiness polling immediately
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SupervisorError::StartupTimeout { .. }
                | SupervisorError::Launch { .. }
                | SupervisorError::HostExited { .. }
                | SupervisorError::Staging { .. }
        )
    }

    /// Process exit code reported by the `tickbridge` binary
    pub fn exit_code(&self) -> u8 {
        match self {
            SupervisorError::Invocation { .. } => 1,
            SupervisorError::Transport { .. } | SupervisorError::Protocol(_) => 2,
            SupervisorError::StartupTimeout { .. } => 3,
            SupervisorError::Launch { .. }
            | SupervisorError::HostExited { .. }
            | SupervisorError::Staging { .. } => 4,
        }
    }
}

/// Result of [`Supervisor::run`]
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Whether this run had to start the host
    pub launched: bool,
    /// Reply to the invocation, if a procedure was named
    pub reply: Option<InvocationReply>,
    pub quit_sent: bool,
}

/// Probes a host this supervisor just launched, failing fast if the child
/// process dies without leaving a live host behind
struct LaunchedHostProbe<'a> {
    client: &'a HostClient,
    child: Mutex<Child>,
    lock_path: PathBuf,
}

impl StatusProbe for LaunchedHostProbe<'_> {
    async fn probe(&self) -> Result<(), SupervisorError> {
        let exited = {
            let mut child = self.child.lock().unwrap_or_else(|p| p.into_inner());
            child.try_wait().ok().flatten()
        };
        // A launcher script may exit after starting the real host
        if let Some(status) = exited {
            if !lockfile::is_held(&self.lock_path) {
                return Err(SupervisorError::HostExited { status });
            }
        }
        self.client.status().await.map(|_| ())
    }
}

/// Client-side orchestration for one project
pub struct Supervisor {
    config: SupervisorConfig,
    client: HostClient,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let client = HostClient::new(
            config.address(),
            config.connect_timeout,
            config.request_timeout,
        )?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn address(&self) -> &HostAddress {
        self.client.address()
    }

    pub fn client(&self) -> &HostClient {
        &self.client
    }

    /// Liveness from the lock file alone, independent of the network
    pub fn host_is_live(&self) -> bool {
        lockfile::is_held(&self.config.lock_path())
    }

    /// Launch a host unless one is already live. Returns whether a launch happened.
    pub async fn ensure_host(&self) -> Result<bool, SupervisorError> {
        let lock_path = self.config.lock_path();
        if lockfile::is_held(&lock_path) {
            tracing::info!(
                pid = ?lockfile::holder_pid(&lock_path),
                "host already running"
            );
            return Ok(false);
        }

        if let Some(staging) = &self.config.staging {
            stage_payload(staging, &self.config.project_root())?;
        }

        let child = launch_host(&self.config)?;
        tracing::info!(pid = child.id(), url = %self.address().url(), "waiting for host to come up");

        let probe = LaunchedHostProbe {
            client: &self.client,
            child: Mutex::new(child),
            lock_path,
        };
        let ready = wait_until_ready(&probe, &self.config.poll).await?;
        tracing::info!(attempts = ready.attempts, "host is ready");
        Ok(true)
    }

    /// Invoke `procedure` and wait for its result.
    ///
    /// A 500 from the host becomes [`SupervisorError::Invocation`] carrying
    /// the captured log.
    pub async fn call(&self, procedure: &str) -> Result<InvocationReply, SupervisorError> {
        let trace_id = Uuid::now_v7().to_string();
        tracing::info!(%trace_id, procedure, "Invoking {procedure}");

        let reply = self.client.invoke(procedure, &trace_id).await?;
        if reply.succeeded() {
            Ok(reply)
        } else {
            Err(SupervisorError::Invocation {
                procedure: procedure.to_string(),
                status: reply.status,
                log: reply.body,
            })
        }
    }

    /// Ask the host to exit once its queue drains
    pub async fn request_quit(&self) -> Result<(), SupervisorError> {
        let reply = self.call(QUIT_COMMAND).await?;
        if !reply.body.is_empty() {
            tracing::warn!("{}", reply.body);
        }
        Ok(())
    }

    /// Full supervisor run: ensure a host, invoke, then quit if configured.
    ///
    /// `Quit` is still sent after a failed invocation; the invocation's error
    /// wins over a quit error.
    pub async fn run(&self, procedure: Option<&str>) -> Result<RunReport, SupervisorError> {
        let launched = self.ensure_host().await?;

        let invocation = match procedure {
            Some(procedure) => Some(self.call(procedure).await),
            None => None,
        };

        let quit = if self.config.quit_after {
            Some(self.request_quit().await)
        } else {
            None
        };

        let reply = invocation.transpose()?;
        if let Some(Err(e)) = quit {
            return Err(e);
        }

        Ok(RunReport {
            launched,
            reply,
            quit_sent: self.config.quit_after,
        })
    }
}
