//! Host process glue
//!
//! A [`Host`] owns everything a host application needs to accept remote
//! invocations: the liveness lock, the [`Bridge`], and a small tokio runtime
//! running the request server. The application keeps its own main loop and
//! calls [`Host::tick`] from it, or hands control to [`Host::run_main_loop`].
//!
//! ```no_run
//! use tickbridge::{Host, HostConfig, Registry};
//!
//! let mut registry = Registry::new();
//! registry.register("Demo.Hello", |log| {
//!     log.log("hello");
//!     Ok(())
//! });
//!
//! let host = Host::start(HostConfig::for_project(".")).unwrap();
//! host.run_main_loop(&mut registry, || {});
//! host.shutdown();
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::runtime::{Builder, Runtime};

use crate::address::HostAddress;
use crate::bridge::{Bridge, Invoker, Tick};
use crate::config::HostConfig;
use crate::lockfile::{LockError, LockFile};
use crate::server::{HostServer, ServerError};

/// Errors starting a host
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to build server runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// A running host: lock held, listener bound, waiting for ticks
pub struct Host {
    config: HostConfig,
    bridge: Arc<Bridge>,
    address: HostAddress,
    server: Option<HostServer>,
    runtime: Runtime,
    lock: LockFile,
}

impl Host {
    /// Acquire the project's lock, then bind the request server.
    ///
    /// The lock comes first so a second host for the same project fails with
    /// [`LockError::AlreadyHeld`] before touching the port. Must not be called
    /// from inside an async context.
    pub fn start(config: HostConfig) -> Result<Self, HostError> {
        let lock = LockFile::acquire(config.lock_path())?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.server_threads.max(1))
            .thread_name("tickbridge-server")
            .enable_all()
            .build()
            .map_err(HostError::Runtime)?;

        let bridge = Arc::new(Bridge::new(config.allow_remote_quit));
        let server = runtime.block_on(HostServer::bind(Arc::clone(&bridge), config.address()))?;
        let address = config.address().with_port(server.local_addr().port());

        tracing::info!(
            url = %address.url(),
            project = address.project(),
            remote_quit = config.allow_remote_quit,
            "Starting listener"
        );

        Ok(Self {
            config,
            bridge,
            address,
            server: Some(server),
            runtime,
            lock,
        })
    }

    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    /// Address the listener actually serves (port resolved if 0 was requested)
    pub fn address(&self) -> &HostAddress {
        &self.address
    }

    pub fn url(&self) -> String {
        self.address.url()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(HostServer::local_addr)
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run at most one queued command on the calling thread
    pub fn tick(&self, invoker: &mut dyn Invoker) -> Tick {
        self.bridge.tick(invoker)
    }

    /// Tick until a `Quit` has been honoured and the queue drained.
    ///
    /// `on_frame` runs once per iteration before the tick, standing in for the
    /// application's own per-frame work.
    pub fn run_main_loop(&self, invoker: &mut dyn Invoker, mut on_frame: impl FnMut()) {
        let mut frames: u64 = 0;
        loop {
            on_frame();
            frames += 1;
            match self.bridge.tick(invoker) {
                Tick::Shutdown => break,
                Tick::Ran(report) => {
                    tracing::debug!(name = %report.name, result = report.result.as_str(), "tick ran command");
                }
                Tick::Idle | Tick::Busy => {}
            }
            std::thread::sleep(self.config.tick_interval);
        }
        tracing::info!(frames, "main loop finished");
    }

    /// Treat Ctrl-C like a remote `Quit`: finish queued commands, then stop
    pub fn quit_on_ctrl_c(&self) {
        let bridge = Arc::clone(&self.bridge);
        self.runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, finishing queued commands");
                bridge.queue().request_quit();
            }
        });
    }

    /// Stop the listener, abandon anything still queued, and release the lock
    pub fn shutdown(mut self) {
        let abandoned = self.bridge.queue().close();
        if abandoned > 0 {
            tracing::warn!(abandoned, "host stopping with commands still queued");
        }

        if let Some(server) = self.server.take() {
            self.runtime.block_on(server.shutdown(self.config.shutdown_grace));
        }
        self.runtime.shutdown_timeout(self.config.shutdown_grace);
        tracing::info!(lock = %self.lock.path().display(), "host stopped");
    }
}
