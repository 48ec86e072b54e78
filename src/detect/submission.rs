//! Detects submitted work from worker navigation.
//!
//! Submitting a task answers the form POST with a 302 to the next page. The
//! tab is closed before it follows the redirect, and focus passes to the next
//! worker in line.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, error, info, warn};

use super::interruption::is_interruption_title;
use crate::context::OrchestrationContext;
use crate::queue::WorkItem;
use crate::worker::ResponseEvent;

static TASK_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/projects/[^/]+/tasks/[^/?#]+(/submit)?([?#].*)?$").expect("static regex")
});

/// Whether a response is a task submission redirect.
pub fn is_submission(event: &ResponseEvent) -> bool {
    event.method.eq_ignore_ascii_case("POST") && event.status == 302 && TASK_URL.is_match(&event.url)
}

/// What a response event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Ignored,
    /// The item was completed and removed from the queue.
    Completed(WorkItem),
    /// The tab was showing a challenge page; the item stays queued.
    Interrupted(WorkItem),
}

/// Watches worker responses for submissions.
pub struct SubmissionDetector {
    ctx: Arc<OrchestrationContext>,
}

impl SubmissionDetector {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self { ctx }
    }

    /// Handle a response on any tab.
    ///
    /// The worker itself is dropped from the pool by the tab-closed
    /// notification that follows, not here.
    pub async fn handle_response(&self, event: &ResponseEvent) -> SubmissionOutcome {
        if !is_submission(event) {
            return SubmissionOutcome::Ignored;
        }

        let (item, next) = {
            let state = self.ctx.read().await;
            if !state.flags.tabber {
                return SubmissionOutcome::Ignored;
            }
            let Some(index) = state.worker_index(event.tab) else {
                return SubmissionOutcome::Ignored;
            };
            (state.workers[index].item.clone(), state.successor(event.tab))
        };
        debug!(tab = %event.tab, next = ?next, "Submission on worker");

        let title = match self.ctx.substrate.get_tab(event.tab).await {
            Ok(Some(info)) => info.title,
            Ok(None) => {
                debug!(tab = %event.tab, "Submitted tab is already gone");
                return SubmissionOutcome::Ignored;
            }
            Err(e) => {
                warn!(tab = %event.tab, error = %e, "Could not read submitted tab");
                return SubmissionOutcome::Ignored;
            }
        };

        let outcome = if is_interruption_title(&title) {
            debug!(item = %item, "Submission came from a challenge page, keeping item");
            SubmissionOutcome::Interrupted(item)
        } else {
            let mut state = self.ctx.write().await;
            state.queue.remove(&item);
            state.last_completed = Some(item.clone());
            info!(item = %item, queued = state.queue.len(), "Task submitted");
            SubmissionOutcome::Completed(item)
        };

        match self.ctx.substrate.close_tab(event.tab).await {
            Ok(()) => {
                if let Some(next) = next
                    && let Err(e) = self.ctx.substrate.focus_tab(next).await
                {
                    warn!(tab = %next, error = %e, "Error focusing next worker");
                }
            }
            Err(e) => error!(tab = %event.tab, error = %e, "Error removing tab after submission"),
        }
        outcome
    }
}
