//! Run-scoped shared state.
//!
//! The only state every worker sees is a [`RunContext`]: the stop token,
//! the stop reason, the remaining-request counter for count mode, and the
//! lifecycle state. There are no process globals; two runs in one process
//! never interfere.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Created,
    Initialized,
    Running,
    /// Stop was requested; in-flight exchanges are finishing.
    Draining,
    Completed,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every request in count mode was claimed.
    Exhausted,
    /// The duration budget elapsed.
    DurationElapsed,
    /// Stopped from outside (signal or handle).
    Interrupted,
    /// The streaming output could not be written.
    OutputFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Exhausted => "all requests sent",
            StopReason::DurationElapsed => "duration elapsed",
            StopReason::Interrupted => "interrupted",
            StopReason::OutputFailed => "output failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
pub struct RunContext {
    stop: CancellationToken,
    reason: OnceLock<StopReason>,
    remaining: Option<AtomicU64>,
    state: Mutex<RunState>,
}

impl RunContext {
    /// Context for a run of `total` requests, or an open-ended run when
    /// `total` is `None`.
    pub fn new(total: Option<u64>) -> Self {
        Self {
            stop: CancellationToken::new(),
            reason: OnceLock::new(),
            remaining: total.map(AtomicU64::new),
            state: Mutex::new(RunState::Created),
        }
    }

    /// Request the run to stop. Only the first caller's reason is kept;
    /// returns whether this call was the first.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        // Cancel before touching the state so `mark_running` cannot miss it.
        self.stop.cancel();
        {
            let mut state = self.lock_state();
            if *state == RunState::Running {
                *state = RunState::Draining;
            }
        }

        if first {
            info!(reason = %reason, "Stop requested");
        } else {
            debug!(reason = %reason, "Stop already requested, ignoring");
        }
        first
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn stop_token(&self) -> &CancellationToken {
        &self.stop
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Claim one request. Always succeeds in an open-ended run; in count
    /// mode fails once every request has been claimed.
    pub fn try_claim(&self) -> bool {
        match self.remaining {
            None => true,
            Some(ref remaining) => remaining
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    /// Requests not yet claimed, in count mode.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining.as_ref().map(|r| r.load(Ordering::Acquire))
    }

    pub fn state(&self) -> RunState {
        *self.lock_state()
    }

    pub(crate) fn set_state(&self, next: RunState) {
        *self.lock_state() = next;
    }

    /// Enter `Running`, or go straight to `Draining` when stop was
    /// requested before the run started.
    pub(crate) fn mark_running(&self) {
        let mut state = self.lock_state();
        *state = if self.stop.is_cancelled() {
            RunState::Draining
        } else {
            RunState::Running
        };
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable control handle for a run.
#[derive(Debug, Clone)]
pub struct RunHandle {
    context: Arc<RunContext>,
}

impl RunHandle {
    pub(crate) fn new(context: Arc<RunContext>) -> Self {
        Self { context }
    }

    /// Stop the run. Idempotent and safe to call from any task; in-flight
    /// exchanges are allowed to finish.
    pub fn stop(&self) {
        self.stop_with(StopReason::Interrupted);
    }

    pub(crate) fn stop_with(&self, reason: StopReason) -> bool {
        self.context.request_stop(reason)
    }

    pub fn state(&self) -> RunState {
        self.context.state()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.context.stop_reason()
    }

    pub fn is_stopped(&self) -> bool {
        self.context.is_stopped()
    }

    /// Resolves once stop has been requested.
    pub async fn cancelled(&self) {
        self.context.stop_token().cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_are_exact() {
        let ctx = RunContext::new(Some(3));
        assert!(ctx.try_claim());
        assert!(ctx.try_claim());
        assert!(ctx.try_claim());
        assert!(!ctx.try_claim());
        assert!(!ctx.try_claim());
        assert_eq!(ctx.remaining(), Some(0));
    }

    #[test]
    fn test_open_ended_claims_always_succeed() {
        let ctx = RunContext::new(None);
        for _ in 0..10_000 {
            assert!(ctx.try_claim());
        }
        assert_eq!(ctx.remaining(), None);
    }

    #[test]
    fn test_first_stop_reason_wins() {
        let ctx = RunContext::new(None);
        ctx.mark_running();
        assert!(ctx.request_stop(StopReason::DurationElapsed));
        assert!(!ctx.request_stop(StopReason::Interrupted));
        assert_eq!(ctx.stop_reason(), Some(StopReason::DurationElapsed));
        assert_eq!(ctx.state(), RunState::Draining);
        assert!(ctx.is_stopped());
    }

    #[test]
    fn test_stop_before_running_drains_immediately() {
        let ctx = RunContext::new(Some(5));
        ctx.set_state(RunState::Initialized);
        ctx.request_stop(StopReason::Interrupted);
        assert_eq!(ctx.state(), RunState::Initialized);

        ctx.mark_running();
        assert_eq!(ctx.state(), RunState::Draining);
    }

    #[test]
    fn test_concurrent_claims_never_overshoot() {
        let ctx = Arc::new(RunContext::new(Some(10_000)));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let ctx = ctx.clone();
                std::thread::spawn(move || {
                    let mut claimed = 0u64;
                    while ctx.try_claim() {
                        claimed += 1;
                    }
                    claimed
                })
            })
            .collect();

        let total: u64 = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, 10_000);
    }

    #[tokio::test]
    async fn test_handle_stop_is_idempotent_across_tasks() {
        let ctx = Arc::new(RunContext::new(None));
        ctx.mark_running();
        let handle = RunHandle::new(ctx.clone());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.stop() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        handle.cancelled().await;
        assert_eq!(handle.stop_reason(), Some(StopReason::Interrupted));
        assert_eq!(handle.state(), RunState::Draining);
    }
}
