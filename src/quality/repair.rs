//! Bounded retry-with-repair around an unreliable validation step.
//!
//! Attempt counting: with `max_attempts = n` the check runs at most `n + 1`
//! times and the repair at most `n` times. The last check is never followed
//! by a repair. Nothing here is checkpointed; an interrupted loop starts over
//! from attempt 1 on the next run.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use super::CommandOutcome;

/// The check being retried, e.g. compiling a set of files.
#[async_trait]
pub trait Validate<I: ?Sized + Sync>: Send + Sync {
    async fn validate(&self, items: &I) -> CommandOutcome;
}

/// Side-effecting fix applied between failed checks, e.g. rewriting files.
#[async_trait]
pub trait Repair<I: ?Sized + Sync>: Send + Sync {
    async fn repair(&self, items: &I, diagnostics: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct RepairLoop {
    max_attempts: u32,
}

impl RepairLoop {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `check` until it passes, repairing between failures.
    ///
    /// A failing check is never an error: the final outcome is returned for
    /// the caller to judge. Only a failing repair is propagated.
    pub async fn run<I>(
        &self,
        check: &dyn Validate<I>,
        repair: Option<&dyn Repair<I>>,
        items: &I,
    ) -> Result<CommandOutcome>
    where
        I: ?Sized + Sync,
    {
        for attempt in 1..=self.max_attempts {
            info!(attempt, max = self.max_attempts, "Validation attempt");
            let outcome = check.validate(items).await;
            if outcome.success {
                return Ok(outcome);
            }

            if let Some(repair) = repair {
                info!(attempt, "Applying fix");
                repair.repair(items, &outcome.output).await?;
            }
        }

        let outcome = check.validate(items).await;
        if !outcome.success {
            warn!(
                attempts = self.max_attempts + 1,
                "Command failed after {} attempts", self.max_attempts
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails until `passes_after` repairs have been applied.
    struct FlakyCheck {
        calls: AtomicU32,
        repairs: std::sync::Arc<AtomicU32>,
        passes_after: Option<u32>,
    }

    #[async_trait]
    impl Validate<[String]> for FlakyCheck {
        async fn validate(&self, _items: &[String]) -> CommandOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.passes_after {
                Some(k) if self.repairs.load(Ordering::SeqCst) >= k => {
                    CommandOutcome::success("ok")
                }
                _ => CommandOutcome::failure(format!("error TS2304 on call {}", n)),
            }
        }
    }

    struct RecordingRepair {
        count: std::sync::Arc<AtomicU32>,
        seen: Mutex<Vec<(usize, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl Repair<[String]> for RecordingRepair {
        async fn repair(&self, items: &[String], diagnostics: &str) -> Result<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((items.len(), diagnostics.to_string()));
            if self.fail {
                anyhow::bail!("synthesis unavailable");
            }
            Ok(())
        }
    }

    fn fixtures(passes_after: Option<u32>, fail_repair: bool) -> (FlakyCheck, RecordingRepair) {
        let repairs = std::sync::Arc::new(AtomicU32::new(0));
        (
            FlakyCheck {
                calls: AtomicU32::new(0),
                repairs: repairs.clone(),
                passes_after,
            },
            RecordingRepair {
                count: repairs,
                seen: Mutex::new(Vec::new()),
                fail: fail_repair,
            },
        )
    }

    fn files() -> Vec<String> {
        vec!["a.ts".to_string(), "b.ts".to_string()]
    }

    #[tokio::test]
    async fn test_always_failing_check_hits_the_bound() {
        let (check, repair) = fixtures(None, false);
        let outcome = RepairLoop::new(3)
            .run::<[String]>(&check, Some(&repair), files().as_slice())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(check.calls.load(Ordering::SeqCst), 4);
        assert_eq!(repair.count.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.output, "error TS2304 on call 4");
    }

    #[tokio::test]
    async fn test_one_repair_then_success_short_circuits() {
        let (check, repair) = fixtures(Some(1), false);
        let outcome = RepairLoop::new(3)
            .run::<[String]>(&check, Some(&repair), files().as_slice())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(check.calls.load(Ordering::SeqCst), 2);
        assert_eq!(repair.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_immediate_success_never_repairs() {
        let (check, repair) = fixtures(Some(0), false);
        let outcome = RepairLoop::new(3)
            .run::<[String]>(&check, Some(&repair), files().as_slice())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repair.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repair_receives_items_and_diagnostics() {
        let (check, repair) = fixtures(Some(1), false);
        RepairLoop::new(2)
            .run::<[String]>(&check, Some(&repair), files().as_slice())
            .await
            .unwrap();
        let seen = repair.seen.lock().unwrap();
        assert_eq!(*seen, vec![(2, "error TS2304 on call 1".to_string())]);
    }

    #[tokio::test]
    async fn test_without_repair_still_retries() {
        let (check, _repair) = fixtures(None, false);
        let outcome = RepairLoop::new(2)
            .run::<[String]>(&check, None, files().as_slice())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(check.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_check_once() {
        let (check, repair) = fixtures(None, false);
        let outcome = RepairLoop::new(0)
            .run::<[String]>(&check, Some(&repair), files().as_slice())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
        assert_eq!(repair.count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_repair_propagates() {
        let (check, repair) = fixtures(None, true);
        let err = RepairLoop::new(3)
            .run::<[String]>(&check, Some(&repair), files().as_slice())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "synthesis unavailable");
        assert_eq!(check.calls.load(Ordering::SeqCst), 1);
    }
}
