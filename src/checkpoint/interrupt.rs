//! Last-resort state capture on interrupt signals and stage failures.
//!
//! Neither path decides what a safe point is. They only guarantee that the
//! orchestrator's live snapshot reaches the store before the process exits or
//! the error reaches the top level.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Exit status used after an interrupt has been handled (128 + SIGINT).
pub const INTERRUPT_EXIT_CODE: i32 = 130;

/// Flushes the orchestrator's in-memory state to durable storage.
///
/// Implementations must be safe to call from the signal task while the main
/// task is mid-stage: copy the state under a short lock, then write.
pub trait StateSaver: Send + Sync {
    fn save_state(&self) -> Result<()>;

    /// Called right before `save_state` when the process is being interrupted.
    fn mark_interrupted(&self) {}

    /// Called right before `save_state` when a stage error is about to propagate.
    fn mark_failed(&self) {}
}

/// Background task that saves state and exits when SIGINT/SIGTERM arrives.
///
/// Dropping the guard uninstalls the handler.
pub struct InterruptGuard {
    handle: JoinHandle<()>,
}

impl InterruptGuard {
    /// Install the handler on the current tokio runtime.
    pub fn install(saver: Arc<dyn StateSaver>) -> Self {
        let handle = tokio::spawn(async move {
            let signal = wait_for_termination().await;
            warn!(signal, "Interrupt received, saving progress before exit");
            saver.mark_interrupted();
            if let Err(e) = saver.save_state() {
                error!(error = %e, "Failed to save state during interrupt");
            }
            std::process::exit(INTERRUPT_EXIT_CODE);
        });
        Self { handle }
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(unix)]
async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "CTRL_C"
}

/// Run `work`; on error, flush state through `saver` and return the error unchanged.
pub async fn capture_failure<T, Fut>(saver: &dyn StateSaver, work: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match work.await {
        Ok(value) => Ok(value),
        Err(e) => {
            flush_after_error(saver, &e);
            Err(e)
        }
    }
}

pub(crate) fn flush_after_error(saver: &dyn StateSaver, cause: &anyhow::Error) {
    saver.mark_failed();
    match saver.save_state() {
        Ok(()) => warn!(error = %cause, "Exception occurred, state saved"),
        Err(save_err) => error!(
            error = %cause,
            save_error = %save_err,
            "Exception occurred and state could not be saved"
        ),
    }
}
