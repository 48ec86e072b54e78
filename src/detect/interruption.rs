//! Challenge-page handling.
//!
//! When the site decides a worker is going too fast it serves a challenge page
//! titled "Server Busy" in place of the task. The user solves it by hand; the
//! next title change on that tab means it moved on, so the tab is closed (its
//! item stays queued and gets a fresh worker) and focus moves along.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::context::OrchestrationContext;
use crate::notify::{AlertKind, INTERRUPTION_MESSAGE};
use crate::worker::TabHandle;

/// Lower-cased title fragment of the challenge page.
pub const INTERRUPTION_SIGNATURE: &str = "server busy";

/// Whether a tab title is the challenge page.
pub fn is_interruption_title(title: &str) -> bool {
    title.to_lowercase().contains(INTERRUPTION_SIGNATURE)
}

/// Which workers are currently interrupted.
pub trait InterruptionTracker: Send + Sync {
    fn is_interrupted(&self, tab: TabHandle) -> bool;

    /// Start tracking `tab`. Returns false if it cannot be tracked now.
    fn try_enter(&mut self, tab: TabHandle) -> bool;

    /// Stop tracking `tab`. Returns false if it was not tracked.
    fn clear(&mut self, tab: TabHandle) -> bool;

    fn interrupted(&self) -> Vec<TabHandle>;
}

/// Tracks a single interrupted worker at a time.
///
/// While one worker is interrupted, others entering a challenge are not
/// tracked.
#[derive(Debug, Default)]
pub struct SingleSlotTracker {
    slot: Option<TabHandle>,
}

impl InterruptionTracker for SingleSlotTracker {
    fn is_interrupted(&self, tab: TabHandle) -> bool {
        self.slot == Some(tab)
    }

    fn try_enter(&mut self, tab: TabHandle) -> bool {
        match self.slot {
            None => {
                self.slot = Some(tab);
                true
            }
            Some(_) => false,
        }
    }

    fn clear(&mut self, tab: TabHandle) -> bool {
        if self.slot == Some(tab) {
            self.slot = None;
            true
        } else {
            false
        }
    }

    fn interrupted(&self) -> Vec<TabHandle> {
        self.slot.into_iter().collect()
    }
}

/// What a title change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleOutcome {
    Ignored,
    /// The worker landed on a challenge page.
    Entered,
    /// The worker left the challenge page and was closed.
    Resolved { next: Option<TabHandle> },
}

/// Reacts to worker title changes.
pub struct InterruptionHandler {
    ctx: Arc<OrchestrationContext>,
    tracker: Mutex<Box<dyn InterruptionTracker>>,
}

impl InterruptionHandler {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self::with_tracker(ctx, Box::new(SingleSlotTracker::default()))
    }

    pub fn with_tracker(
        ctx: Arc<OrchestrationContext>,
        tracker: Box<dyn InterruptionTracker>,
    ) -> Self {
        Self {
            ctx,
            tracker: Mutex::new(tracker),
        }
    }

    pub async fn handle_title_change(&self, tab: TabHandle, title: &str) -> TitleOutcome {
        let next = {
            let state = self.ctx.read().await;
            if !state.flags.tabber || !state.is_managed(tab) {
                return TitleOutcome::Ignored;
            }
            state.successor(tab)
        };

        let challenged = is_interruption_title(title);
        {
            let mut tracker = self.tracker.lock().await;
            if tracker.is_interrupted(tab) {
                if challenged {
                    return TitleOutcome::Ignored;
                }
                tracker.clear(tab);
            } else {
                if challenged && tracker.try_enter(tab) {
                    drop(tracker);
                    info!(tab = %tab, "Worker hit a challenge page");
                    self.ctx
                        .notifier
                        .alert(AlertKind::Interruption, INTERRUPTION_MESSAGE)
                        .await;
                    return TitleOutcome::Entered;
                }
                return TitleOutcome::Ignored;
            }
        }

        info!(tab = %tab, "Challenge page passed, closing worker");
        match self.ctx.substrate.close_tab(tab).await {
            Ok(()) => {
                if let Some(next) = next
                    && let Err(e) = self.ctx.substrate.focus_tab(next).await
                {
                    warn!(tab = %next, error = %e, "Error focusing next worker");
                }
            }
            Err(e) => warn!(tab = %tab, error = %e, "Error removing tab after challenge"),
        }
        TitleOutcome::Resolved { next }
    }

    /// Forget a tab that closed, whatever closed it.
    pub async fn release(&self, tab: TabHandle) {
        self.tracker.lock().await.clear(tab);
    }

    pub async fn interrupted(&self) -> Vec<TabHandle> {
        self.tracker.lock().await.interrupted()
    }
}
