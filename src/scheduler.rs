//! Named, independently cancellable interval timers.
//!
//! Each tick spawns its callback as its own task, so stopping a timer only
//! prevents future ticks and never aborts a callback already running.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// The timers the orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Refresh the queue from the remote listing.
    QueueRefresh,
    /// Try to claim a task.
    Claim,
    /// Try to open a worker.
    Placement,
    /// Wait for the first worker to focus it.
    FocusFirst,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::QueueRefresh => "queue_refresh",
            Self::Claim => "claim",
            Self::Placement => "placement",
            Self::FocusFirst => "focus_first",
        };
        write!(f, "{s}")
    }
}

struct Ticket {
    period: Duration,
    handle: JoinHandle<()>,
}

/// Set of running timers, at most one per kind.
#[derive(Clone, Default)]
pub struct Timers {
    tickets: Arc<Mutex<HashMap<TimerKind, Ticket>>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    fn tickets(&self) -> MutexGuard<'_, HashMap<TimerKind, Ticket>> {
        self.tickets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start `kind`, replacing any timer of that kind already running.
    ///
    /// The first tick fires one `period` after the call.
    pub fn start<F, Fut>(&self, kind: TimerKind, period: Duration, task: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                tokio::spawn(task());
            }
        });

        if let Some(previous) = self.tickets().insert(kind, Ticket { period, handle }) {
            previous.handle.abort();
        }
        debug!(timer = %kind, period_ms = period.as_millis() as u64, "Timer started");
    }

    /// Stop `kind`. Returns false if it was not running.
    pub fn stop(&self, kind: TimerKind) -> bool {
        match self.tickets().remove(&kind) {
            Some(ticket) => {
                ticket.handle.abort();
                debug!(timer = %kind, "Timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn stop_all(&self) {
        for (kind, ticket) in self.tickets().drain() {
            ticket.handle.abort();
            debug!(timer = %kind, "Timer stopped");
        }
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.tickets().contains_key(&kind)
    }

    /// Period of a running timer.
    pub fn period(&self, kind: TimerKind) -> Option<Duration> {
        self.tickets().get(&kind).map(|t| t.period)
    }

    /// Kinds currently running.
    pub fn running(&self) -> Vec<TimerKind> {
        self.tickets().keys().copied().collect()
    }
}
