//! Claiming new work items.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::{OrchestrationContext, SingleFlight};
use crate::queue::WorkItem;
use crate::remote::ClaimResponse;
use crate::session::SessionMonitor;

/// Result of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// A task was assigned and appended to the queue.
    Claimed(WorkItem),
    /// The site answered but did not hand out a task.
    NoItemAvailable,
    /// The queue is at the admission bound; no request was made.
    AtCapacity,
    /// Another claim is outstanding; no request was made.
    Busy,
    /// The request itself failed.
    Failed,
}

/// Requests new work items, one at a time.
pub struct ClaimEngine {
    ctx: Arc<OrchestrationContext>,
    session: Arc<SessionMonitor>,
    flight: SingleFlight,
}

impl ClaimEngine {
    pub fn new(ctx: Arc<OrchestrationContext>, session: Arc<SessionMonitor>) -> Self {
        Self {
            ctx,
            session,
            flight: SingleFlight::new(),
        }
    }

    /// Try to claim one task from `target`.
    ///
    /// Does not retry; the next claim tick is the retry.
    pub async fn claim(&self, target: &str) -> ClaimOutcome {
        let Some(_guard) = self.flight.try_begin() else {
            return ClaimOutcome::Busy;
        };

        {
            let state = self.ctx.read().await;
            if state.queue.len() >= state.config.max_queue {
                return ClaimOutcome::AtCapacity;
            }
        }

        if target.is_empty() {
            debug!("No claim target configured");
            return ClaimOutcome::NoItemAvailable;
        }

        let response = match self.ctx.remote.accept_random(target).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Error claiming task");
                // Being signed out is the usual reason a claim request fails
                self.session.check_session().await;
                return ClaimOutcome::Failed;
            }
        };

        match claimed_item(&response, target) {
            Some(item) => {
                let mut state = self.ctx.write().await;
                if state.queue.push(item.clone()) {
                    info!(item = %item, queued = state.queue.len(), "Claimed task");
                } else {
                    debug!(item = %item, "Claimed task was already queued");
                }
                ClaimOutcome::Claimed(item)
            }
            None => {
                debug!(
                    status = response.status,
                    url = %response.final_url,
                    "Could not claim task"
                );
                ClaimOutcome::NoItemAvailable
            }
        }
    }

    pub fn is_claiming(&self) -> bool {
        self.flight.is_busy()
    }
}

/// Decide whether a response handed out a task.
///
/// This is a heuristic over a response format we do not control: an assigned
/// task redirects to a task URL under the target project. When a challenge
/// page is served instead, the final URL is the request URL itself, which also
/// contains the target, so it must not count.
pub fn claimed_item(response: &ClaimResponse, target: &str) -> Option<WorkItem> {
    let claimed = response.is_success()
        && response.final_url.contains(target)
        && response.final_url != response.request_url;
    claimed.then(|| WorkItem::canonicalize(&response.final_url))
}
