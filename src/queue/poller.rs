//! Queue refresh from the remote listing.
//!
//! A refresh fully replaces the local queue with the listing, minus the most
//! recently completed item: the site keeps listing a just-submitted task for a
//! while, and reopening it would waste a worker. Failures never clear the
//! queue; the previous contents stay until a refresh succeeds.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{Queue, WorkItem};
use crate::context::{OrchestrationContext, SingleFlight};
use crate::error::RemoteError;
use crate::remote::TaskListing;

/// Why a refresh produced no queue.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// Another refresh is still running; no request was made.
    #[error("a queue refresh is already in flight")]
    InFlight,

    /// The listing could not be fetched or decoded.
    #[error("queue unavailable: {0}")]
    Unavailable(#[from] RemoteError),
}

/// Fetches the remote listing and reconciles it into the local queue.
pub struct QueuePoller {
    ctx: Arc<OrchestrationContext>,
    flight: SingleFlight,
}

impl QueuePoller {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self {
            ctx,
            flight: SingleFlight::new(),
        }
    }

    /// Fetch and build a fresh queue without touching local state.
    pub async fn refresh(&self) -> Result<Queue, RefreshError> {
        let Some(_guard) = self.flight.try_begin() else {
            return Err(RefreshError::InFlight);
        };
        let listing = self.ctx.remote.fetch_listing().await?;

        let state = self.ctx.read().await;
        Ok(build_queue(
            &listing,
            &state.config.base_url,
            state.last_completed.as_ref(),
        ))
    }

    /// Fetch and replace the local queue. Returns the new queue length.
    pub async fn refresh_and_apply(&self) -> Result<usize, RefreshError> {
        let Some(_guard) = self.flight.try_begin() else {
            return Err(RefreshError::InFlight);
        };
        let listing = match self.ctx.remote.fetch_listing().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(error = %e, "Could not get queue, keeping previous contents");
                return Err(e.into());
            }
        };

        let mut state = self.ctx.write().await;
        let queue = build_queue(
            &listing,
            &state.config.base_url,
            state.last_completed.as_ref(),
        );
        debug!(
            previous = state.queue.len(),
            current = queue.len(),
            "Queue refreshed"
        );
        state.queue = queue;
        Ok(state.queue.len())
    }

    pub fn is_refreshing(&self) -> bool {
        self.flight.is_busy()
    }
}

/// Turn a listing into an ordered queue, dropping `last_completed`.
pub fn build_queue(
    listing: &TaskListing,
    base_url: &str,
    last_completed: Option<&WorkItem>,
) -> Queue {
    let mut queue: Queue = listing
        .tasks
        .iter()
        .map(|task| WorkItem::canonicalize(&format!("{base_url}{}", task.task_url)))
        .collect();

    if let Some(done) = last_completed
        && queue.remove(done)
    {
        debug!(item = %done, "Dropped just-completed item still in the listing");
    }
    queue
}
