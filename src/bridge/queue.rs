//! Command Queue - FIFO hand-off between request handlers and the main loop
//!
//! Handlers enqueue a [`Command`] and hold on to its [`CommandTicket`]. The
//! main loop dequeues one command per tick, runs it, and completes it, which
//! fires the ticket exactly once.
//!
//! ```text
//!  handler ──enqueue──► [ A | B | C ] ──next()──► main loop
//!     ▲                                              │
//!     └──────────── oneshot (CommandOutcome) ◄───────┘
//! ```
//!
//! The lock is held for push/pop only, never while a command executes.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::log_sink::LogEntry;
use crate::metrics::QUEUE_DEPTH;

/// Success/failure classification of an executed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    Failure,
}

impl ResultCode {
    /// HTTP status the server reports for this result
    pub fn http_status(self) -> u16 {
        match self {
            ResultCode::Success => 200,
            ResultCode::Failure => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::Failure => "failure",
        }
    }
}

/// Immutable result of one executed command, handed to its waiter
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub id: Uuid,
    pub name: String,
    pub result: ResultCode,
    /// Entries captured during this command's window, in order
    pub log: Vec<LogEntry>,
    /// Time spent in the invocation itself
    pub duration: Duration,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.result == ResultCode::Success
    }

    /// Newline-joined `"<severity>: <message>"` lines
    pub fn body(&self) -> String {
        self.log
            .iter()
            .map(|entry| entry.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A pending request to invoke a named procedure
#[derive(Debug)]
pub struct Command {
    id: Uuid,
    name: String,
    enqueued_at: Instant,
    completion: oneshot::Sender<CommandOutcome>,
}

impl Command {
    fn new(name: String) -> (Self, CommandTicket) {
        let id = Uuid::now_v7();
        let (completion, receiver) = oneshot::channel();
        let command = Self {
            id,
            name: name.clone(),
            enqueued_at: Instant::now(),
            completion,
        };
        let ticket = CommandTicket { id, name, receiver };
        (command, ticket)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long the command waited in the queue
    pub fn queued_for(&self) -> Duration {
        self.enqueued_at.elapsed()
    }

    /// Fire the completion signal. Consumes the command, so it can only happen once.
    pub(crate) fn complete(self, outcome: CommandOutcome) {
        if self.completion.send(outcome).is_err() {
            tracing::debug!(id = %self.id, name = %self.name, "caller went away before completion");
        }
    }
}

/// A command was dropped without running because the host is shutting down
#[derive(Debug, Error)]
#[error("command `{name}` was abandoned: host is shutting down")]
pub struct CommandAbandoned {
    pub name: String,
}

/// The waiting half of an enqueued command
#[derive(Debug)]
pub struct CommandTicket {
    id: Uuid,
    name: String,
    receiver: oneshot::Receiver<CommandOutcome>,
}

impl CommandTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the main loop to complete the command
    pub async fn wait(self) -> Result<CommandOutcome, CommandAbandoned> {
        let name = self.name;
        self.receiver.await.map_err(|_| CommandAbandoned { name })
    }

    /// Blocking variant for plain threads. Must not be called from async code.
    pub fn wait_blocking(self) -> Result<CommandOutcome, CommandAbandoned> {
        let name = self.name;
        self.receiver
            .blocking_recv()
            .map_err(|_| CommandAbandoned { name })
    }
}

/// What the main loop got from the queue this tick
#[derive(Debug)]
pub enum Dequeued {
    Command(Command),
    /// Nothing pending
    Empty,
    /// Nothing pending and quit was requested; the queue is now closed
    Shutdown,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Command>,
    quit_requested: bool,
    closed: bool,
}

/// Thread-safe FIFO of pending commands
#[derive(Debug, Default)]
pub struct CommandQueue {
    state: Mutex<QueueState>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a command for `name` and return its ticket.
    ///
    /// Never fails. Once the queue is closed the command is dropped on the
    /// spot and the ticket resolves to [`CommandAbandoned`].
    pub fn enqueue(&self, name: impl Into<String>) -> CommandTicket {
        let (command, ticket) = Command::new(name.into());
        let mut state = self.state();
        if state.closed {
            tracing::warn!(name = %command.name, "queue closed, abandoning command");
            return ticket;
        }
        state.pending.push_back(command);
        QUEUE_DEPTH.set(state.pending.len() as f64);
        ticket
    }

    /// Pop the head, if any
    pub fn try_dequeue(&self) -> Option<Command> {
        let mut state = self.state();
        let command = state.pending.pop_front();
        QUEUE_DEPTH.set(state.pending.len() as f64);
        command
    }

    /// Pop the head, or, when empty with quit requested, close the queue.
    ///
    /// Both checks happen under one lock acquisition, so nothing can slip in
    /// between "observed empty" and "shutting down".
    pub fn next(&self) -> Dequeued {
        let mut state = self.state();
        if let Some(command) = state.pending.pop_front() {
            QUEUE_DEPTH.set(state.pending.len() as f64);
            return Dequeued::Command(command);
        }
        if state.quit_requested {
            state.closed = true;
            return Dequeued::Shutdown;
        }
        Dequeued::Empty
    }

    pub fn is_empty(&self) -> bool {
        self.state().pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    /// Latch the idle-shutdown flag. Not cancellable.
    pub(crate) fn request_quit(&self) {
        self.state().quit_requested = true;
    }

    /// Close the queue and drop everything still pending. Returns how many
    /// commands were abandoned; their tickets resolve to [`CommandAbandoned`].
    pub fn close(&self) -> usize {
        let mut state = self.state();
        state.closed = true;
        let abandoned = state.pending.len();
        state.pending.clear();
        QUEUE_DEPTH.set(0.0);
        abandoned
    }

    pub fn quit_requested(&self) -> bool {
        self.state().quit_requested
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}
