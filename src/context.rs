//! Shared orchestration state.
//!
//! Every component is constructed with an `Arc<OrchestrationContext>`. The
//! state lock is only ever held for synchronous sections: anything that awaits
//! a network or tab call must drop the guard first and re-read afterwards,
//! since timer callbacks and event handlers interleave at every await.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, broadcast};

use crate::config::{FeatureFlags, OrchestrationConfig, SettingsChange};
use crate::notify::Notifier;
use crate::queue::{Queue, WorkItem};
use crate::remote::RemoteSource;
use crate::worker::{TabHandle, WorkerSubstrate};

/// Capacity of the published-settings channel.
const SETTINGS_BROADCAST_CAPACITY: usize = 64;

/// One open tab bound to one work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worker {
    pub tab: TabHandle,
    pub item: WorkItem,
}

/// Mutable orchestration state.
#[derive(Debug, Default)]
pub struct OrchestrationState {
    pub config: OrchestrationConfig,
    pub flags: FeatureFlags,
    pub queue: Queue,
    /// Live workers in placement order.
    pub workers: Vec<Worker>,
    /// Most recently completed item; the remote listing lags in dropping it.
    pub last_completed: Option<WorkItem>,
}

impl OrchestrationState {
    pub fn worker_index(&self, tab: TabHandle) -> Option<usize> {
        self.workers.iter().position(|w| w.tab == tab)
    }

    pub fn is_managed(&self, tab: TabHandle) -> bool {
        self.worker_index(tab).is_some()
    }

    /// The worker placed right after `tab`, if any.
    pub fn successor(&self, tab: TabHandle) -> Option<TabHandle> {
        let index = self.worker_index(tab)?;
        self.workers.get(index + 1).map(|w| w.tab)
    }

    pub fn is_placed(&self, item: &WorkItem) -> bool {
        self.workers.iter().any(|w| &w.item == item)
    }
}

/// Context object handed to every component.
pub struct OrchestrationContext {
    state: RwLock<OrchestrationState>,
    pub remote: Arc<dyn RemoteSource>,
    pub substrate: Arc<dyn WorkerSubstrate>,
    pub notifier: Arc<dyn Notifier>,
    settings_tx: broadcast::Sender<SettingsChange>,
}

impl OrchestrationContext {
    pub fn new(
        config: OrchestrationConfig,
        remote: Arc<dyn RemoteSource>,
        substrate: Arc<dyn WorkerSubstrate>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        let (settings_tx, _rx) = broadcast::channel(SETTINGS_BROADCAST_CAPACITY);
        Arc::new(Self {
            state: RwLock::new(OrchestrationState {
                config,
                ..Default::default()
            }),
            remote,
            substrate,
            notifier,
            settings_tx,
        })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, OrchestrationState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, OrchestrationState> {
        self.state.write().await
    }

    pub async fn flags(&self) -> FeatureFlags {
        self.state.read().await.flags
    }

    pub async fn config(&self) -> OrchestrationConfig {
        self.state.read().await.config.clone()
    }

    /// Settings changes the core made on its own.
    pub fn subscribe_settings(&self) -> broadcast::Receiver<SettingsChange> {
        self.settings_tx.subscribe()
    }

    /// Publish a change the core made on its own.
    pub fn publish_setting(&self, change: SettingsChange) {
        // Ok if nobody is listening
        let _ = self.settings_tx.send(change);
    }

    /// Turn both features off and publish the change.
    ///
    /// Flags are cleared immediately so no further tick does work; the
    /// orchestrator picks the published changes up to stop timers and close
    /// workers, and the settings store persists them.
    pub async fn disable_features(&self) {
        {
            let mut state = self.state.write().await;
            state.flags = FeatureFlags::default();
        }
        self.publish_setting(SettingsChange::CatcherEnabled(false));
        self.publish_setting(SettingsChange::TabberEnabled(false));
    }
}

/// Guard flag allowing at most one in-progress run of an operation.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the flag. `None` if a run is already in progress.
    ///
    /// The returned guard clears the flag when dropped, on every exit path.
    pub fn try_begin(&self) -> Option<FlightGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Clears its `SingleFlight` on drop.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    busy: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
