//! Procedure registry - resolves a command name to something callable
//!
//! The host application decides what can be invoked. The executor only sees
//! the [`Invoker`] seam: `invoke(name) -> success`.

use std::collections::BTreeMap;

use super::log_sink::LogSink;

/// Resolves and runs a named procedure on the main loop thread.
///
/// Implementations log through `log` and return `false` on failure. Panics
/// are contained by the executor, so implementations need not catch them.
///
/// `tracing` events are captured as well when the subscriber carries
/// [`CaptureLayer`](super::CaptureLayer), but only those emitted on the
/// calling thread. Work handed to other threads must log through `log`.
pub trait Invoker {
    fn invoke(&mut self, name: &str, log: &LogSink) -> bool;
}

type Procedure = Box<dyn FnMut(&LogSink) -> anyhow::Result<()>>;

/// Name → procedure dispatch table supplied by the host application.
///
/// Procedures are `FnMut` and need not be `Send`: they only ever run on the
/// main loop thread, so they may own main-thread state directly.
#[derive(Default)]
pub struct Registry {
    procedures: BTreeMap<String, Procedure>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `procedure` under `name`, replacing any previous entry
    pub fn register<F>(&mut self, name: impl Into<String>, procedure: F) -> &mut Self
    where
        F: FnMut(&LogSink) -> anyhow::Result<()> + 'static,
    {
        self.procedures.insert(name.into(), Box::new(procedure));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.procedures.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.procedures.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }
}

impl Invoker for Registry {
    fn invoke(&mut self, name: &str, log: &LogSink) -> bool {
        tracing::debug!(name, "invoking procedure");

        let Some(procedure) = self.procedures.get_mut(name) else {
            log.warning(format!("Failed to find procedure named {name}"));
            return false;
        };

        match procedure(log) {
            Ok(()) => true,
            Err(e) => {
                log.warning(format!("Failed to invoke {name}. Error returned."));
                log.exception(format!("{e:#}"));
                false
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("procedures", &self.procedures.keys().collect::<Vec<_>>())
            .finish()
    }
}
