//! Cancellable periodic timer
//!
//! Drives connection retries and subscriber keep-alives. The timer task is
//! spawned when the timer is constructed and parks until [`RepeatingTimer::resume`]
//! is called, so a timer that is never resumed can still be cancelled or
//! dropped safely.
//!
//! ```text
//!   new() ──► Suspended ◄──suspend()── Resumed
//!                 │  ──────resume()──────►  │
//!                 │                         │ (every interval) handler().await
//!                 └──────► Cancelled ◄──────┘
//!                          (terminal)
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Boxed future returned by a timer handler
pub type TimerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type TimerHandler = Arc<dyn Fn() -> TimerFuture + Send + Sync>;

/// Scheduling state of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Parked, not firing
    Suspended,
    /// Firing every interval
    Resumed,
    /// Stopped for good
    Cancelled,
}

/// Whether the timer re-arms after firing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    Repeating,
    /// Suspends itself after one fire; `resume()` arms it again
    OneShot,
}

/// Periodic (or one-shot) timer running on its own tokio task
pub struct RepeatingTimer {
    interval: Duration,
    mode: TimerMode,
    state: Arc<watch::Sender<TimerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RepeatingTimer {
    /// Create a suspended repeating timer.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<F, Fut>(interval: Duration, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_mode(interval, TimerMode::Repeating, handler)
    }

    /// Create a suspended one-shot timer.
    pub fn once<F, Fut>(delay: Duration, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_mode(delay, TimerMode::OneShot, handler)
    }

    fn with_mode<F, Fut>(interval: Duration, mode: TimerMode, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: TimerHandler = Arc::new(move || Box::pin(handler()) as TimerFuture);
        let (tx, rx) = watch::channel(TimerState::Suspended);
        let state = Arc::new(tx);

        let task = tokio::spawn(run_timer(interval, mode, Arc::clone(&state), rx, handler));

        Self {
            interval,
            mode,
            state,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    pub fn is_resumed(&self) -> bool {
        self.state() == TimerState::Resumed
    }

    /// Start firing. The first fire happens one interval from now.
    ///
    /// No-op if already resumed or cancelled.
    pub fn resume(&self) {
        self.state.send_if_modified(|state| {
            if *state == TimerState::Suspended {
                *state = TimerState::Resumed;
                true
            } else {
                false
            }
        });
    }

    /// Stop firing until resumed again. No-op unless resumed.
    pub fn suspend(&self) {
        self.state.send_if_modified(|state| {
            if *state == TimerState::Resumed {
                *state = TimerState::Suspended;
                true
            } else {
                false
            }
        });
    }

    /// Stop the timer permanently.
    ///
    /// Idempotent and valid from any state. No fire is scheduled after this
    /// returns; a handler that is mid-flight is aborted at its next await.
    pub fn cancel(&self) {
        self.state.send_replace(TimerState::Cancelled);
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for RepeatingTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatingTimer")
            .field("interval", &self.interval)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish()
    }
}

async fn run_timer(
    interval: Duration,
    mode: TimerMode,
    state: Arc<watch::Sender<TimerState>>,
    mut rx: watch::Receiver<TimerState>,
    handler: TimerHandler,
) {
    loop {
        // Park until resumed
        loop {
            let current = *rx.borrow_and_update();
            match current {
                TimerState::Resumed => break,
                TimerState::Cancelled => return,
                TimerState::Suspended => {
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                // Suspended, cancelled, or resumed again: re-arm from scratch
                continue;
            }
        }

        if *rx.borrow() != TimerState::Resumed {
            continue;
        }

        handler().await;

        if mode == TimerMode::OneShot {
            state.send_if_modified(|s| {
                if *s == TimerState::Resumed {
                    *s = TimerState::Suspended;
                    true
                } else {
                    false
                }
            });
        }
    }
}
