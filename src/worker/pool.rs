//! The bounded set of worker tabs.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use super::substrate::TabHandle;
use crate::context::{OrchestrationContext, SingleFlight, Worker};
use crate::queue::WorkItem;

/// Result of a placement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// A tab was opened for the item.
    Placed { item: WorkItem, tab: TabHandle },
    /// Every queued item already has a worker, or a placement is running.
    NoCandidate,
    /// The pool is full.
    AtCapacity,
    /// The tab could not be opened; the item stays queued.
    Failed(WorkItem),
}

/// Opens, orders, and prunes worker tabs.
pub struct WorkerPool {
    ctx: Arc<OrchestrationContext>,
    flight: SingleFlight,
}

impl WorkerPool {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self {
            ctx,
            flight: SingleFlight::new(),
        }
    }

    /// Open a worker for the earliest queued item without one.
    pub async fn place_next(&self) -> PlacementOutcome {
        // Two overlapping placements could otherwise bind the same item twice
        let Some(_guard) = self.flight.try_begin() else {
            return PlacementOutcome::NoCandidate;
        };

        let candidate = {
            let state = self.ctx.read().await;
            if state.workers.len() >= state.config.max_workers {
                return PlacementOutcome::AtCapacity;
            }
            state.queue.iter().find(|i| !state.is_placed(i)).cloned()
        };
        let Some(item) = candidate else {
            return PlacementOutcome::NoCandidate;
        };

        let position = self.next_position().await;
        let tab = match self
            .ctx
            .substrate
            .create_tab(item.as_str(), position, false)
            .await
        {
            Ok(tab) => tab,
            Err(e) => {
                error!(item = %item, error = %e, "Error creating tab");
                return PlacementOutcome::Failed(item);
            }
        };

        {
            let mut state = self.ctx.write().await;
            if state.flags.tabber {
                state.workers.push(Worker {
                    tab,
                    item: item.clone(),
                });
                info!(item = %item, tab = %tab, position, workers = state.workers.len(), "Opened worker");
                return PlacementOutcome::Placed { item, tab };
            }
        }

        // Worker management was switched off while the tab was opening
        debug!(tab = %tab, "Closing tab opened after teardown");
        if let Err(e) = self.ctx.substrate.close_tab(tab).await {
            warn!(tab = %tab, error = %e, "Error closing late tab");
        }
        PlacementOutcome::NoCandidate
    }

    /// Position for the next tab: right after the last live worker, or right
    /// after the focused tab when the pool is empty.
    ///
    /// Best effort. Workers whose tabs cannot be looked up are skipped.
    pub async fn next_position(&self) -> usize {
        let tabs: Vec<TabHandle> = {
            let state = self.ctx.read().await;
            state.workers.iter().map(|w| w.tab).collect()
        };

        if tabs.is_empty() {
            let focused = match self.ctx.substrate.focused_position().await {
                Ok(position) => position,
                Err(e) => {
                    warn!(error = %e, "Could not find focused tab");
                    None
                }
            };
            return focused.unwrap_or(0) + 1;
        }

        let lookups = join_all(tabs.iter().map(|&tab| self.ctx.substrate.get_tab(tab))).await;
        lookups
            .into_iter()
            .filter_map(|lookup| lookup.ok().flatten())
            .map(|info| info.position)
            .max()
            .map_or(0, |highest| highest + 1)
    }

    /// Focus the first worker. Returns false while the pool is still empty.
    pub async fn focus_first(&self) -> bool {
        let first = {
            let state = self.ctx.read().await;
            state.workers.first().map(|w| w.tab)
        };
        let Some(tab) = first else {
            return false;
        };
        if let Err(e) = self.ctx.substrate.focus_tab(tab).await {
            warn!(tab = %tab, error = %e, "Error focusing first worker");
        }
        true
    }

    /// Forget workers that are both gone from the queue and no longer open.
    ///
    /// Workers closed by completion handling are dropped by the tab-closed
    /// notification; this catches the ones orphaned by external closure while
    /// the queue drifted. Returns the number pruned.
    pub async fn reconcile(&self) -> usize {
        if self.ctx.read().await.workers.is_empty() {
            return 0;
        }

        let open = match self.ctx.substrate.open_tabs().await {
            Ok(open) => open,
            Err(e) => {
                warn!(error = %e, "Could not list open tabs, skipping cleanup");
                return 0;
            }
        };

        let mut state = self.ctx.write().await;
        let state = &mut *state;
        let before = state.workers.len();
        let queue = &state.queue;
        state
            .workers
            .retain(|w| open.contains(&w.tab) || queue.contains(&w.item));
        let pruned = before - state.workers.len();
        if pruned > 0 {
            debug!(pruned, "Pruned stale workers");
        }
        pruned
    }

    /// Close every worker tab and empty the pool.
    pub async fn teardown_all(&self) {
        let tabs: Vec<TabHandle> = {
            let mut state = self.ctx.write().await;
            state.workers.drain(..).map(|w| w.tab).collect()
        };
        if tabs.is_empty() {
            return;
        }
        info!(count = tabs.len(), "Closing all workers");
        if let Err(e) = self.ctx.substrate.close_tabs(&tabs).await {
            error!(error = %e, "Error closing workers");
        }
    }

    /// Drop the worker bound to a closed tab.
    pub async fn remove_worker(&self, tab: TabHandle) -> Option<Worker> {
        let mut state = self.ctx.write().await;
        let index = state.worker_index(tab)?;
        let worker = state.workers.remove(index);
        debug!(tab = %tab, item = %worker.item, "Worker tab closed");
        Some(worker)
    }

    pub async fn len(&self) -> usize {
        self.ctx.read().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ctx.read().await.workers.is_empty()
    }
}
