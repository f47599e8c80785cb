//! Bounded readiness polling
//!
//! Polls a status probe on a fixed interval. Each failed probe counts
//! against `max_failures`; the probe after the last tolerated failure is the
//! final one, so a host that never answers costs exactly `max_failures + 1`
//! attempts. The first success is provisional: the host may rebind its
//! listener right after coming up, so the poll waits `settle_delay` and
//! probes again before reporting ready.

use super::SupervisorError;
use crate::config::PollPolicy;

/// Something that can tell whether the host answers yet
#[allow(async_fn_in_trait)]
pub trait StatusProbe {
    async fn probe(&self) -> Result<(), SupervisorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyReport {
    /// Probes sent, including the confirmation probe
    pub attempts: u32,
}

/// Poll `probe` until it succeeds twice in a row across the settle delay
pub async fn wait_until_ready<P: StatusProbe>(
    probe: &P,
    policy: &PollPolicy,
) -> Result<ReadyReport, SupervisorError> {
    let mut attempts: u32 = 0;
    let mut failures: u32 = 0;
    let mut provisional = false;

    loop {
        attempts += 1;
        match probe.probe().await {
            Ok(()) if provisional || policy.settle_delay.is_zero() => {
                return Ok(ReadyReport { attempts });
            }
            Ok(()) => {
                tracing::debug!(attempt = attempts, "host answered, confirming after settle delay");
                provisional = true;
                tokio::time::sleep(policy.settle_delay).await;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                provisional = false;
                failures += 1;
                if failures > policy.max_failures {
                    tracing::warn!(attempts, "giving up on host startup: {e}");
                    return Err(SupervisorError::StartupTimeout { attempts });
                }
                tracing::debug!(
                    attempt = attempts,
                    failures,
                    max_failures = policy.max_failures,
                    "host not ready: {e}"
                );
                tokio::time::sleep(policy.interval).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails until `ready_at`, then succeeds; optionally fails once more
    /// right after the first success
    struct ScriptedProbe {
        calls: AtomicU32,
        ready_at: u32,
        flaps_once: bool,
    }

    impl ScriptedProbe {
        fn new(ready_at: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                ready_at,
                flaps_once: false,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl StatusProbe for ScriptedProbe {
        async fn probe(&self) -> Result<(), SupervisorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let down = call < self.ready_at || (self.flaps_once && call == self.ready_at + 1);
            if down {
                Err(SupervisorError::Protocol("not yet".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct ExitedProbe;

    impl StatusProbe for ExitedProbe {
        async fn probe(&self) -> Result<(), SupervisorError> {
            Err(SupervisorError::Launch {
                executable: "missing".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn fast_policy(max_failures: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            max_failures,
            settle_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_ready_at_attempt_k() {
        let probe = ScriptedProbe::new(4);
        let report = wait_until_ready(&probe, &fast_policy(5)).await.unwrap();
        // 3 failures, provisional success, confirmation
        assert_eq!(report.attempts, 5);
        assert_eq!(probe.calls(), 5);
    }

    #[tokio::test]
    async fn test_ready_on_last_allowed_attempt() {
        let probe = ScriptedProbe::new(6);
        let report = wait_until_ready(&probe, &fast_policy(5)).await.unwrap();
        assert_eq!(report.attempts, 7);
    }

    #[tokio::test]
    async fn test_never_ready_times_out_after_max_plus_one() {
        let probe = ScriptedProbe::new(u32::MAX);
        let err = wait_until_ready(&probe, &fast_policy(3)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartupTimeout { attempts: 4 }));
        assert_eq!(probe.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_confirmation_counts_as_failure() {
        let probe = ScriptedProbe {
            calls: AtomicU32::new(0),
            ready_at: 1,
            flaps_once: true,
        };
        let report = wait_until_ready(&probe, &fast_policy(5)).await.unwrap();
        // ok (provisional), fail, ok (provisional), ok (confirmed)
        assert_eq!(report.attempts, 4);
    }

    #[tokio::test]
    async fn test_zero_settle_delay_accepts_first_success() {
        let probe = ScriptedProbe::new(1);
        let policy = PollPolicy {
            settle_delay: Duration::ZERO,
            ..fast_policy(3)
        };
        let report = wait_until_ready(&probe, &policy).await.unwrap();
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_polling() {
        let err = wait_until_ready(&ExitedProbe, &fast_policy(30)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Launch { .. }));
    }
}
