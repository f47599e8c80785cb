//! Main-Loop Executor - one command per host tick
//!
//! `Bridge::tick` is the only place a command runs. It is driven by the
//! host's cooperative main loop and never blocks: it pops at most one command,
//! runs it inside a capture window, classifies the outcome and fires the
//! command's completion signal on every path.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::info_span;
use uuid::Uuid;

use super::log_sink::LogEntry;
use super::queue::{Command, CommandOutcome, Dequeued, ResultCode};
use super::registry::Invoker;
use super::Bridge;
use crate::metrics::{COMMANDS_TOTAL, COMMAND_DURATION};

/// Name of the control command that requests shutdown once the queue drains
pub const QUIT_COMMAND: &str = "Quit";

/// What a single tick did
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Queue was empty
    Idle,
    /// One command ran to completion
    Ran(CommandReport),
    /// Queue drained after a quit request; the host should exit
    Shutdown,
    /// Called while another tick was still running; nothing happened
    Busy,
}

impl Tick {
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Tick::Shutdown)
    }
}

/// Summary of an executed command, for the host's own bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub id: Uuid,
    pub name: String,
    pub result: ResultCode,
    pub entries: usize,
    pub duration: Duration,
}

/// A command fails if the invoker said so or if anything was logged at
/// error, assert or exception severity
pub fn classify(invoked: bool, entries: &[LogEntry]) -> ResultCode {
    if invoked && !entries.iter().any(|entry| entry.severity.is_failure()) {
        ResultCode::Success
    } else {
        ResultCode::Failure
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "procedure panicked".to_string()
    }
}

/// Clears the re-entrancy flag even if the tick unwinds
struct TickGuard<'a>(&'a std::sync::atomic::AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Bridge {
    /// Advance the bridge by one main-loop tick.
    ///
    /// Must be called from the host's main loop thread, which is also where
    /// `invoker` lives.
    pub fn tick(&self, invoker: &mut dyn Invoker) -> Tick {
        if self.ticking.swap(true, Ordering::Acquire) {
            tracing::warn!("tick re-entered from inside a running command, ignoring");
            return Tick::Busy;
        }
        let _guard = TickGuard(&self.ticking);

        match self.queue.next() {
            Dequeued::Empty => Tick::Idle,
            Dequeued::Shutdown => {
                tracing::info!("queue drained after quit request, shutting down");
                Tick::Shutdown
            }
            Dequeued::Command(command) => Tick::Ran(self.execute(command, invoker)),
        }
    }

    fn execute(&self, command: Command, invoker: &mut dyn Invoker) -> CommandReport {
        let span = info_span!("command", id = %command.id(), name = %command.name());
        let _entered = span.enter();
        tracing::debug!(queued_ms = command.queued_for().as_millis() as u64, "dequeued");

        if command.name() == QUIT_COMMAND {
            return self.execute_quit(command);
        }

        let started = Instant::now();
        let capture = self.sink.capture();
        let invoked = panic::catch_unwind(AssertUnwindSafe(|| {
            invoker.invoke(command.name(), &self.sink)
        }))
        .unwrap_or_else(|payload| {
            self.sink.warning(format!(
                "Failed to invoke {}. Procedure panicked.",
                command.name()
            ));
            self.sink.exception(panic_message(payload.as_ref()));
            false
        });
        let log = capture.finish();
        let duration = started.elapsed();

        let result = classify(invoked, &log);
        COMMANDS_TOTAL.with_label_values(&[result.as_str()]).inc();
        COMMAND_DURATION.observe(duration.as_secs_f64());
        tracing::info!(
            result = result.as_str(),
            entries = log.len(),
            duration_ms = duration.as_secs_f64() * 1000.0,
            "command finished"
        );

        let report = CommandReport {
            id: command.id(),
            name: command.name().to_string(),
            result,
            entries: log.len(),
            duration,
        };
        let outcome = CommandOutcome {
            id: report.id,
            name: report.name.clone(),
            result,
            log,
            duration,
        };
        command.complete(outcome);
        report
    }

    fn execute_quit(&self, command: Command) -> CommandReport {
        let mut log = Vec::new();
        if self.allow_remote_quit {
            self.queue.request_quit();
            tracing::info!("quit requested, host exits once the queue is empty");
        } else {
            let entry = LogEntry::new(
                super::log_sink::Severity::Warning,
                "Quit ignored: this host does not accept remote shutdown",
            );
            tracing::warn!("{}", entry.message);
            log.push(entry);
        }

        COMMANDS_TOTAL.with_label_values(&[ResultCode::Success.as_str()]).inc();
        let report = CommandReport {
            id: command.id(),
            name: command.name().to_string(),
            result: ResultCode::Success,
            entries: log.len(),
            duration: Duration::ZERO,
        };
        let outcome = CommandOutcome {
            id: report.id,
            name: report.name.clone(),
            result: ResultCode::Success,
            log,
            duration: Duration::ZERO,
        };
        command.complete(outcome);
        report
    }
}
