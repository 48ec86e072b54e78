//! The scheduling loop.
//!
//! Owns the components and the timers that drive them:
//! - a **queue refresh** timer while either feature is enabled
//! - a **claim** timer while claiming is enabled
//! - a **placement** timer while worker management is enabled
//! - a **focus-first** timer while waiting for the first worker to open
//!
//! Settings changes and tab events arrive on one channel; each settings change
//! re-derives only the timers that depend on the changed field.

use std::future::Future;
use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::claim::{ClaimEngine, ClaimOutcome};
use crate::config::SettingsChange;
use crate::context::OrchestrationContext;
use crate::detect::{InterruptionHandler, SubmissionDetector};
use crate::queue::{QueuePoller, RefreshError};
use crate::scheduler::{TimerKind, Timers};
use crate::session::SessionMonitor;
use crate::worker::{PlacementOutcome, SubstrateEvent, WorkerPool};

/// Input to the orchestrator.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// One setting changed in the settings store.
    Settings(SettingsChange),
    /// Something happened to a tab.
    Substrate(SubstrateEvent),
    /// Stop the loop.
    Shutdown,
}

/// A feature that can be switched on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Catcher,
    Tabber,
}

impl Feature {
    fn tick_timer(self) -> TimerKind {
        match self {
            Self::Catcher => TimerKind::Claim,
            Self::Tabber => TimerKind::Placement,
        }
    }
}

/// Drives claiming, placement and queue refresh on their timers.
pub struct Orchestrator {
    ctx: Arc<OrchestrationContext>,
    session: Arc<SessionMonitor>,
    poller: QueuePoller,
    claims: ClaimEngine,
    pool: WorkerPool,
    submissions: SubmissionDetector,
    interruptions: InterruptionHandler,
    timers: Timers,
    /// Changes the core published itself, applied like any other change.
    published: Mutex<broadcast::Receiver<SettingsChange>>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Arc<Self> {
        let session = Arc::new(SessionMonitor::new(Arc::clone(&ctx)));
        Arc::new(Self {
            poller: QueuePoller::new(Arc::clone(&ctx)),
            claims: ClaimEngine::new(Arc::clone(&ctx), Arc::clone(&session)),
            pool: WorkerPool::new(Arc::clone(&ctx)),
            submissions: SubmissionDetector::new(Arc::clone(&ctx)),
            interruptions: InterruptionHandler::new(Arc::clone(&ctx)),
            published: Mutex::new(ctx.subscribe_settings()),
            timers: Timers::new(),
            session,
            ctx,
        })
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    pub fn interruptions(&self) -> &InterruptionHandler {
        &self.interruptions
    }

    /// Force both features off.
    ///
    /// A previous run may have stopped with features on; nothing resumes
    /// until the user switches it back on.
    pub async fn initialize(self: &Arc<Self>) {
        self.ctx.disable_features().await;
        self.drain_published().await;
        info!("Queue Tabber initialized");
    }

    /// Run until `Shutdown` arrives or the event channel closes.
    ///
    /// Tab events are handed to one task that works them in arrival order,
    /// so a slow tab call never holds up settings changes and a tab's title
    /// changes are never seen out of order.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<OrchestratorEvent>) {
        let (tab_tx, tab_rx) = mpsc::unbounded_channel();
        let tab_events = tokio::spawn(Arc::clone(&self).route_tab_events(tab_rx));

        let mut published = self.published.lock().await;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(OrchestratorEvent::Settings(change)) => self.apply_settings(change).await,
                    Some(OrchestratorEvent::Substrate(event)) => {
                        if tab_tx.send(event).is_err() {
                            warn!("Tab event task stopped");
                            break;
                        }
                    }
                    Some(OrchestratorEvent::Shutdown) | None => break,
                },
                change = published.recv() => match change {
                    Ok(change) => self.apply_settings(change).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed published settings changes");
                    }
                    Err(RecvError::Closed) => {}
                },
            }
        }
        drop(published);

        tab_events.abort();
        self.timers.stop_all();
        info!("Orchestrator stopped");
    }

    async fn route_tab_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SubstrateEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_substrate_event(event).await;
        }
    }

    /// Apply changes the core published itself, outside of `run`.
    async fn drain_published(self: &Arc<Self>) {
        loop {
            let change = match self.published.lock().await.try_recv() {
                Ok(change) => change,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            };
            self.apply_settings(change).await;
        }
    }

    /// Apply one settings change and re-derive the timers that depend on it.
    pub async fn apply_settings(self: &Arc<Self>, change: SettingsChange) {
        debug!(setting = change.key(), value = %change.value(), "Setting changed");
        {
            let mut state = self.ctx.write().await;
            state.config.apply(&change);
            match change {
                SettingsChange::CatcherEnabled(on) => state.flags.catcher = on,
                SettingsChange::TabberEnabled(on) => state.flags.tabber = on,
                _ => {}
            }
        }

        match change {
            SettingsChange::CatcherEnabled(on) => self.toggle(Feature::Catcher, on).await,
            SettingsChange::TabberEnabled(on) => self.toggle(Feature::Tabber, on).await,
            SettingsChange::TickInterval(_) => {
                self.restart_tick_timer(Feature::Catcher).await;
                self.restart_tick_timer(Feature::Tabber).await;
            }
            SettingsChange::QueueCheckInterval(_) => self.sync_queue_timer().await,
            SettingsChange::MaxWorkers(_)
            | SettingsChange::MaxQueue(_)
            | SettingsChange::ClaimTarget(_) => {}
        }
    }

    async fn toggle(self: &Arc<Self>, feature: Feature, on: bool) {
        if on {
            info!(feature = ?feature, "Feature enabled");
            let this = Arc::clone(self);
            tokio::spawn(async move { this.start_feature(feature).await });
            return;
        }

        self.timers.stop(feature.tick_timer());
        if feature == Feature::Tabber {
            self.timers.stop(TimerKind::FocusFirst);
            self.pool.teardown_all().await;
        }
        self.sync_queue_timer().await;
        info!(feature = ?feature, "Feature disabled");
    }

    /// Startup for a freshly enabled feature: session check, queue refresh,
    /// queue timer, then the feature's own timer.
    ///
    /// Flags are re-read after every await; a feature switched off meanwhile
    /// gets no timers.
    pub async fn start_feature(self: &Arc<Self>, feature: Feature) {
        if !self.session.check_session().await.assume_signed_in() {
            return;
        }
        if !self.is_enabled(feature).await {
            return;
        }

        self.check_queue().await;
        self.sync_queue_timer().await;
        if self.is_enabled(feature).await {
            self.restart_tick_timer(feature).await;
        }
    }

    async fn is_enabled(&self, feature: Feature) -> bool {
        let flags = self.ctx.flags().await;
        match feature {
            Feature::Catcher => flags.catcher,
            Feature::Tabber => flags.tabber,
        }
    }

    /// Restart the queue timer if either feature is on, stop it otherwise.
    async fn sync_queue_timer(self: &Arc<Self>) {
        let (any, period) = {
            let state = self.ctx.read().await;
            (state.flags.any(), state.config.queue_check_interval)
        };
        if !any {
            self.timers.stop(TimerKind::QueueRefresh);
            return;
        }
        let this = Arc::downgrade(self);
        self.timers.start(TimerKind::QueueRefresh, period, move || {
            tick(&this, |o| async move { o.check_queue().await })
        });
    }

    /// Restart a feature's tick timer at the current tick interval, if the
    /// feature is on.
    async fn restart_tick_timer(self: &Arc<Self>, feature: Feature) {
        let period = self.ctx.read().await.config.tick_interval;
        if !self.is_enabled(feature).await {
            self.timers.stop(feature.tick_timer());
            return;
        }
        let this = Arc::downgrade(self);
        match feature {
            Feature::Catcher => self.timers.start(TimerKind::Claim, period, move || {
                tick(&this, |o| async move {
                    o.claim_tick().await;
                })
            }),
            Feature::Tabber => self.timers.start(TimerKind::Placement, period, move || {
                tick(&this, |o| async move {
                    o.placement_tick().await;
                })
            }),
        }
    }

    /// Refresh the queue, then prune workers. A failed refresh keeps the old
    /// queue and prunes nothing.
    pub async fn check_queue(&self) {
        match self.poller.refresh_and_apply().await {
            Ok(len) => {
                debug!(queued = len, "Queue checked");
                self.pool.reconcile().await;
            }
            Err(RefreshError::InFlight) => debug!("Queue refresh already running"),
            Err(RefreshError::Unavailable(_)) => {}
        }
    }

    pub async fn claim_tick(&self) -> Option<ClaimOutcome> {
        let (enabled, target) = {
            let state = self.ctx.read().await;
            (state.flags.catcher, state.config.claim_target.clone())
        };
        if !enabled {
            self.timers.stop(TimerKind::Claim);
            return None;
        }
        let outcome = self.claims.claim(&target).await;
        debug!(outcome = ?outcome, "Claim tick");
        Some(outcome)
    }

    pub async fn placement_tick(self: &Arc<Self>) -> Option<PlacementOutcome> {
        let (enabled, workers, queued, capacity) = {
            let state = self.ctx.read().await;
            (
                state.flags.tabber,
                state.workers.len(),
                state.queue.len(),
                state.config.max_workers,
            )
        };
        if !enabled {
            self.timers.stop(TimerKind::Placement);
            return None;
        }
        if workers >= queued || workers >= capacity {
            return None;
        }
        if workers == 0 {
            self.arm_focus_first().await;
        }
        Some(self.pool.place_next().await)
    }

    /// Start waiting for the first worker, unless already waiting.
    async fn arm_focus_first(self: &Arc<Self>) {
        if self.timers.is_running(TimerKind::FocusFirst) {
            return;
        }
        let (tabber, empty, period) = {
            let state = self.ctx.read().await;
            (
                state.flags.tabber,
                state.workers.is_empty(),
                state.config.tick_interval,
            )
        };
        if !tabber || !empty {
            return;
        }
        let this = Arc::downgrade(self);
        self.timers.start(TimerKind::FocusFirst, period, move || {
            tick(&this, |o| async move { o.focus_first_tick().await })
        });
    }

    async fn focus_first_tick(&self) {
        if !self.ctx.flags().await.tabber || self.pool.focus_first().await {
            self.timers.stop(TimerKind::FocusFirst);
        }
    }

    /// Route a tab event to the component that owns it.
    pub async fn handle_substrate_event(&self, event: SubstrateEvent) {
        match event {
            SubstrateEvent::TabClosed(tab) => {
                self.pool.remove_worker(tab).await;
                self.interruptions.release(tab).await;
            }
            SubstrateEvent::TitleChanged { tab, title } => {
                let outcome = self.interruptions.handle_title_change(tab, &title).await;
                debug!(tab = %tab, outcome = ?outcome, "Title changed");
            }
            SubstrateEvent::ResponseReceived(response) => {
                let outcome = self.submissions.handle_response(&response).await;
                debug!(tab = %response.tab, outcome = ?outcome, "Response observed");
            }
        }
    }
}

/// Run `f` against the orchestrator if it is still alive.
fn tick<F, Fut>(this: &Weak<Orchestrator>, f: F) -> impl Future<Output = ()> + Send + use<F, Fut>
where
    F: FnOnce(Arc<Orchestrator>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let this = Weak::clone(this);
    async move {
        if let Some(orchestrator) = this.upgrade() {
            f(orchestrator).await;
        }
    }
}
