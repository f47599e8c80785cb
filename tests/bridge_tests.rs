//! Bridge behaviour across threads: the request side enqueues from many
//! threads while one thread ticks.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tickbridge::bridge::{Bridge, Invoker, LogSink, ResultCode, Severity, Tick, QUIT_COMMAND};
use tickbridge::Registry;

/// Logs its own name and remembers the order it was called in
#[derive(Default)]
struct EchoInvoker {
    calls: Vec<String>,
    attached_during_call: bool,
}

impl Invoker for EchoInvoker {
    fn invoke(&mut self, name: &str, log: &LogSink) -> bool {
        self.attached_during_call = log.is_attached();
        self.calls.push(name.to_string());
        log.log(name);
        true
    }
}

fn tick_until_finished(bridge: &Bridge, invoker: &mut dyn Invoker, handles: &[thread::JoinHandle<()>]) {
    while !handles.iter().all(|h| h.is_finished()) {
        bridge.tick(invoker);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Test that callers on many threads each receive only their own command's log
#[test]
fn test_concurrent_callers_see_only_their_own_result() {
    const CALLERS: usize = 16;
    let bridge = Arc::new(Bridge::new(true));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let name = format!("Echo.Caller{i}");
                let outcome = bridge.enqueue(name.as_str()).wait_blocking().unwrap();
                assert_eq!(outcome.name, name);
                assert_eq!(outcome.result, ResultCode::Success);
                assert_eq!(outcome.body(), format!("Log: {name}"));
            })
        })
        .collect();

    let mut invoker = EchoInvoker::default();
    tick_until_finished(&bridge, &mut invoker, &handles);
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(invoker.calls.len(), CALLERS);
    assert!(invoker.attached_during_call);
    assert!(bridge.queue().is_empty());
}

/// Test that one tick runs one command, in enqueue order
#[test]
fn test_commands_run_in_enqueue_order() {
    let bridge = Bridge::new(true);
    let a = bridge.enqueue("A");
    let b = bridge.enqueue("B");
    let c = bridge.enqueue("C");

    let mut invoker = EchoInvoker::default();
    for _ in 0..3 {
        assert!(matches!(bridge.tick(&mut invoker), Tick::Ran(_)));
    }
    assert_eq!(invoker.calls, vec!["A", "B", "C"]);

    // A's window closed before B's opened: nothing of A leaks into B
    assert_eq!(a.wait_blocking().unwrap().body(), "Log: A");
    assert_eq!(b.wait_blocking().unwrap().body(), "Log: B");
    assert_eq!(c.wait_blocking().unwrap().body(), "Log: C");
}

/// Test that Quit lets already-queued commands finish before shutdown
#[test]
fn test_quit_waits_for_queue_to_drain() {
    let bridge = Bridge::new(true);
    let mut invoker = EchoInvoker::default();

    let first = bridge.enqueue("Work.First");
    let quit = bridge.enqueue(QUIT_COMMAND);
    let last = bridge.enqueue("Work.Last");

    assert!(matches!(bridge.tick(&mut invoker), Tick::Ran(_)));
    assert!(matches!(bridge.tick(&mut invoker), Tick::Ran(_)));
    assert!(bridge.queue().quit_requested());
    assert!(matches!(bridge.tick(&mut invoker), Tick::Ran(_)));
    assert_eq!(bridge.tick(&mut invoker), Tick::Shutdown);

    assert!(first.wait_blocking().unwrap().succeeded());
    assert!(quit.wait_blocking().unwrap().succeeded());
    assert!(last.wait_blocking().unwrap().succeeded());
    assert_eq!(invoker.calls, vec!["Work.First", "Work.Last"]);
}

/// Test that commands enqueued after shutdown resolve as abandoned
#[test]
fn test_enqueue_after_shutdown_is_abandoned() {
    let bridge = Bridge::new(true);
    let mut invoker = EchoInvoker::default();

    let _quit = bridge.enqueue(QUIT_COMMAND);
    bridge.tick(&mut invoker);
    assert_eq!(bridge.tick(&mut invoker), Tick::Shutdown);

    let late = bridge.enqueue("Work.Late");
    let err = late.wait_blocking().unwrap_err();
    assert_eq!(err.name, "Work.Late");
    assert!(invoker.calls.is_empty());
}

/// Test that repeated invocations of one procedure get separate results
#[test]
fn test_repeated_invocations_are_independent() {
    let bridge = Bridge::new(true);
    let mut registry = Registry::new();
    let mut calls = 0;
    registry.register("Demo.Count", move |log| {
        calls += 1;
        log.log(format!("Called {calls} times"));
        Ok(())
    });

    let first = bridge.enqueue("Demo.Count");
    bridge.tick(&mut registry);
    let second = bridge.enqueue("Demo.Count");
    bridge.tick(&mut registry);

    let first = first.wait_blocking().unwrap();
    let second = second.wait_blocking().unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(first.log.len(), 1);
    assert_eq!(second.log.len(), 1);
    assert_eq!(first.body(), "Log: Called 1 times");
    assert_eq!(second.body(), "Log: Called 2 times");
}

/// Test that missing procedures, errors and panics come back as failed results
#[test]
fn test_failures_are_reported_through_the_result() {
    let bridge = Bridge::new(true);
    let mut registry = Registry::new();
    registry
        .register("Demo.LogTest", |log| {
            log.log("Level: 'LogMessage'");
            log.warning("Level: 'Warning'");
            log.error("Level: 'Error'");
            Ok(())
        })
        .register("Demo.Fail", |_| anyhow::bail!("requested failure"))
        .register("Demo.Quiet", |_| Ok(()));

    let logged = bridge.enqueue("Demo.LogTest");
    let failed = bridge.enqueue("Demo.Fail");
    let unknown = bridge.enqueue("Demo.Missing");
    let quiet = bridge.enqueue("Demo.Quiet");
    for _ in 0..4 {
        bridge.tick(&mut registry);
    }

    let logged = logged.wait_blocking().unwrap();
    assert_eq!(logged.result, ResultCode::Failure);
    assert_eq!(
        logged.body(),
        "Log: Level: 'LogMessage'\nWarning: Level: 'Warning'\nError: Level: 'Error'"
    );

    let failed = failed.wait_blocking().unwrap();
    assert_eq!(failed.result, ResultCode::Failure);
    assert_eq!(failed.log[0].severity, Severity::Warning);
    assert_eq!(failed.log[1].severity, Severity::Exception);
    assert_eq!(failed.log[1].message, "requested failure");

    let unknown = unknown.wait_blocking().unwrap();
    assert_eq!(unknown.result, ResultCode::Failure);
    assert_eq!(unknown.body(), "Warning: Failed to find procedure named Demo.Missing");

    // The host keeps going after failures
    let quiet = quiet.wait_blocking().unwrap();
    assert!(quiet.succeeded());
    assert_eq!(quiet.body(), "");
}
