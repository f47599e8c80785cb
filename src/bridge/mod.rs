//! The bridge between concurrent request handlers and a single-threaded
//! main loop
//!
//! One [`Bridge`] exists per host process. Request handlers share it behind an
//! `Arc` and call [`Bridge::enqueue`]; the host's main loop calls
//! [`Bridge::tick`] once per iteration.
//!
//! # Architecture
//!
//! ```text
//!  handler threads                     main loop thread
//!  ───────────────                     ────────────────
//!  enqueue(name) ──► CommandQueue ──► tick()
//!       │                               │ capture window on LogSink
//!       │                               │ Invoker::invoke(name)
//!       ▼                               ▼
//!  ticket.wait() ◄──── oneshot ───── complete(outcome)
//! ```

pub mod executor;
pub mod log_sink;
pub mod queue;
pub mod registry;

use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

pub use executor::{classify, CommandReport, Tick, QUIT_COMMAND};
pub use log_sink::{CaptureLayer, LogEntry, LogSink, Severity};
pub use queue::{
    Command, CommandAbandoned, CommandOutcome, CommandQueue, CommandTicket, Dequeued, ResultCode,
};
pub use registry::{Invoker, Registry};

/// Owned state shared by the request server and the main-loop executor
#[derive(Debug)]
pub struct Bridge {
    queue: CommandQueue,
    sink: LogSink,
    started_at: Instant,
    ticking: AtomicBool,
    allow_remote_quit: bool,
}

impl Bridge {
    /// Create a bridge. `allow_remote_quit` decides whether the `Quit`
    /// command shuts the host down or is acknowledged and ignored.
    pub fn new(allow_remote_quit: bool) -> Self {
        Self {
            queue: CommandQueue::new(),
            sink: LogSink::new(),
            started_at: Instant::now(),
            ticking: AtomicBool::new(false),
            allow_remote_quit,
        }
    }

    /// Queue a command for the main loop and return the ticket to wait on
    pub fn enqueue(&self, name: impl Into<String>) -> CommandTicket {
        self.queue.enqueue(name)
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn log_sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn allows_remote_quit(&self) -> bool {
        self.allow_remote_quit
    }
}
