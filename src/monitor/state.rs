//! Process-wide run state.
//!
//! The orchestrator owns the only [`RunStateController`]; every loop holds a
//! [`RunStateWatch`] and checks it at each iteration boundary.

use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle of a monitoring run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Draining,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running => write!(f, "running"),
            RunState::Draining => write!(f, "draining"),
            RunState::Done => write!(f, "done"),
        }
    }
}

/// Write side of the run state.
#[derive(Debug)]
pub struct RunStateController {
    tx: watch::Sender<RunState>,
}

impl RunStateController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunState::Pending);
        Self { tx }
    }

    /// Transition to `next`. Watchers are woken immediately.
    pub fn set(&self, next: RunState) {
        let previous = self.tx.send_replace(next);
        if previous != next {
            tracing::info!("Run state: {} -> {}", previous, next);
        }
    }

    /// A read-only handle for a subordinate task.
    pub fn watch(&self) -> RunStateWatch {
        RunStateWatch {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for RunStateController {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the run state.
#[derive(Debug, Clone)]
pub struct RunStateWatch {
    rx: watch::Receiver<RunState>,
}

impl RunStateWatch {
    pub fn current(&self) -> RunState {
        *self.rx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.current() == RunState::Running
    }

    /// Sleep for `duration` unless the run stops first.
    ///
    /// Returns `true` when the full duration elapsed and the run is still
    /// going, `false` as soon as the state leaves `Running`.
    pub async fn pause(&mut self, duration: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        let slept = tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stopped() => false,
        };
        slept && self.is_running()
    }

    /// Resolves once the state is no longer `Running`.
    pub async fn stopped(&mut self) {
        while self.is_running() {
            // A dropped controller means the run is over.
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
