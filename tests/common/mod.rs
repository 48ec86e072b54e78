//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use queue_tabber::config::OrchestrationConfig;
use queue_tabber::context::OrchestrationContext;
use queue_tabber::error::{RemoteError, SubstrateError};
use queue_tabber::notify::{AlertKind, Notifier};
use queue_tabber::queue::WorkItem;
use queue_tabber::remote::{ClaimResponse, ProbeResponse, RemoteSource, TaskEntry, TaskListing};
use queue_tabber::worker::{TabHandle, TabInfo, WorkerSubstrate};

pub const BASE: &str = "https://worker.mturk.com";
pub const TARGET: &str = "GRP";

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Canonical item for task `id` of the claim target.
pub fn item(id: &str) -> WorkItem {
    WorkItem::canonicalize(&format!("{BASE}/projects/{TARGET}/tasks/{id}?assignment_id={id}"))
}

/// Listing path the remote uses for task `id`.
pub fn listing_path(id: &str) -> String {
    format!("/projects/{TARGET}/tasks/{id}.json?assignment_id={id}&ref=w_pl_prvw")
}

fn transport(url: &str) -> RemoteError {
    RemoteError::Transport {
        url: url.to_string(),
        reason: "connection refused".to_string(),
    }
}

// ── Remote ───────────────────────────────────────────────────────────────

/// Scripted remote site.
pub struct StubRemote {
    /// Task ids in the listing; `None` makes the listing request fail.
    listing: Mutex<Option<Vec<String>>>,
    /// Final URLs for upcoming claims; `None` fails the request. Claims past
    /// the script land back on the request URL.
    claims: Mutex<VecDeque<Option<String>>>,
    listing_delay: Mutex<Duration>,
    claim_delay: Mutex<Duration>,
    probe: Mutex<Option<ProbeResponse>>,
    pub listing_calls: AtomicUsize,
    pub claim_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
    claims_in_flight: AtomicUsize,
    pub max_claims_in_flight: AtomicUsize,
}

impl StubRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            listing: Mutex::new(Some(Vec::new())),
            claims: Mutex::new(VecDeque::new()),
            listing_delay: Mutex::new(Duration::ZERO),
            claim_delay: Mutex::new(Duration::ZERO),
            probe: Mutex::new(Some(ProbeResponse::Answered(200))),
            listing_calls: AtomicUsize::new(0),
            claim_calls: AtomicUsize::new(0),
            probe_calls: AtomicUsize::new(0),
            claims_in_flight: AtomicUsize::new(0),
            max_claims_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_listing(&self, ids: &[&str]) {
        *self.listing.lock().unwrap() = Some(ids.iter().map(|s| s.to_string()).collect());
    }

    pub fn fail_listing(&self) {
        *self.listing.lock().unwrap() = None;
    }

    pub fn set_listing_delay(&self, delay: Duration) {
        *self.listing_delay.lock().unwrap() = delay;
    }

    pub fn push_claim(&self, final_url: Option<&str>) {
        self.claims
            .lock()
            .unwrap()
            .push_back(final_url.map(str::to_string));
    }

    pub fn set_claim_delay(&self, delay: Duration) {
        *self.claim_delay.lock().unwrap() = delay;
    }

    pub fn set_probe(&self, probe: Option<ProbeResponse>) {
        *self.probe.lock().unwrap() = probe;
    }

    pub fn claim_url(&self) -> String {
        format!("{BASE}/projects/{TARGET}/tasks/accept_random")
    }
}

#[async_trait]
impl RemoteSource for StubRemote {
    async fn fetch_listing(&self) -> Result<TaskListing, RemoteError> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.listing_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let listing = self.listing.lock().unwrap().clone();
        match listing {
            Some(ids) => Ok(TaskListing {
                tasks: ids
                    .iter()
                    .map(|id| TaskEntry {
                        task_url: listing_path(id),
                    })
                    .collect(),
            }),
            None => Err(transport(&format!("{BASE}/tasks.json"))),
        }
    }

    async fn accept_random(&self, target: &str) -> Result<ClaimResponse, RemoteError> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.claims_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_claims_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.claim_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.claims.lock().unwrap().pop_front();
        self.claims_in_flight.fetch_sub(1, Ordering::SeqCst);

        let request_url = format!("{BASE}/projects/{target}/tasks/accept_random");
        match scripted {
            Some(Some(final_url)) => Ok(ClaimResponse {
                request_url,
                final_url,
                status: 200,
            }),
            Some(None) => Err(transport(&request_url)),
            None => Ok(ClaimResponse {
                final_url: request_url.clone(),
                request_url,
                status: 200,
            }),
        }
    }

    async fn probe_session(&self) -> Result<ProbeResponse, RemoteError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let probe = *self.probe.lock().unwrap();
        probe.ok_or_else(|| transport(&format!("{BASE}/tasks")))
    }
}

// ── Substrate ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct StubTab {
    pub url: String,
    pub title: String,
    pub position: usize,
}

/// In-memory browser.
pub struct StubSubstrate {
    pub tabs: Mutex<BTreeMap<TabHandle, StubTab>>,
    next_id: AtomicU64,
    pub focused: Mutex<Vec<TabHandle>>,
    pub closed: Mutex<Vec<TabHandle>>,
    pub created: Mutex<Vec<(String, usize)>>,
    focused_position: Mutex<Option<usize>>,
    fail_create: AtomicBool,
    create_delay: Mutex<Duration>,
}

impl StubSubstrate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tabs: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(100),
            focused: Mutex::new(Vec::new()),
            closed: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            focused_position: Mutex::new(Some(0)),
            fail_create: AtomicBool::new(false),
            create_delay: Mutex::new(Duration::ZERO),
        })
    }

    pub fn set_title(&self, tab: TabHandle, title: &str) {
        if let Some(t) = self.tabs.lock().unwrap().get_mut(&tab) {
            t.title = title.to_string();
        }
    }

    /// Close a tab the way a user would, without going through the trait.
    pub fn close_externally(&self, tab: TabHandle) {
        self.tabs.lock().unwrap().remove(&tab);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self) -> usize {
        self.tabs.lock().unwrap().len()
    }

    pub fn closed(&self) -> Vec<TabHandle> {
        self.closed.lock().unwrap().clone()
    }

    pub fn focused(&self) -> Vec<TabHandle> {
        self.focused.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<(String, usize)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerSubstrate for StubSubstrate {
    async fn create_tab(
        &self,
        url: &str,
        position: usize,
        _active: bool,
    ) -> Result<TabHandle, SubstrateError> {
        let delay = *self.create_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SubstrateError::OperationFailed {
                op: "create_tab".into(),
                reason: "window closed".into(),
            });
        }
        let tab = TabHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tabs.lock().unwrap().insert(
            tab,
            StubTab {
                url: url.to_string(),
                title: "Task".to_string(),
                position,
            },
        );
        self.created.lock().unwrap().push((url.to_string(), position));
        Ok(tab)
    }

    async fn get_tab(&self, tab: TabHandle) -> Result<Option<TabInfo>, SubstrateError> {
        Ok(self.tabs.lock().unwrap().get(&tab).map(|t| TabInfo {
            title: t.title.clone(),
            position: t.position,
        }))
    }

    async fn close_tabs(&self, tabs: &[TabHandle]) -> Result<(), SubstrateError> {
        let mut open = self.tabs.lock().unwrap();
        for tab in tabs {
            open.remove(tab);
            self.closed.lock().unwrap().push(*tab);
        }
        Ok(())
    }

    async fn focus_tab(&self, tab: TabHandle) -> Result<(), SubstrateError> {
        if !self.tabs.lock().unwrap().contains_key(&tab) {
            return Err(SubstrateError::TabNotFound(tab.0));
        }
        self.focused.lock().unwrap().push(tab);
        Ok(())
    }

    async fn open_tabs(&self) -> Result<HashSet<TabHandle>, SubstrateError> {
        Ok(self.tabs.lock().unwrap().keys().copied().collect())
    }

    async fn focused_position(&self) -> Result<Option<usize>, SubstrateError> {
        Ok(*self.focused_position.lock().unwrap())
    }
}

// ── Notifier ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct StubNotifier {
    pub alerts: Mutex<Vec<(AlertKind, String)>>,
}

impl StubNotifier {
    pub fn kinds(&self) -> Vec<AlertKind> {
        self.alerts.lock().unwrap().iter().map(|(k, _)| *k).collect()
    }
}

#[async_trait]
impl Notifier for StubNotifier {
    async fn alert(&self, kind: AlertKind, message: &str) {
        self.alerts.lock().unwrap().push((kind, message.to_string()));
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

pub struct Harness {
    pub ctx: Arc<OrchestrationContext>,
    pub remote: Arc<StubRemote>,
    pub substrate: Arc<StubSubstrate>,
    pub notifier: Arc<StubNotifier>,
}

pub fn config() -> OrchestrationConfig {
    OrchestrationConfig {
        claim_target: TARGET.to_string(),
        base_url: BASE.to_string(),
        ..OrchestrationConfig::default()
    }
}

pub fn harness(config: OrchestrationConfig) -> Harness {
    let remote = StubRemote::new();
    let substrate = StubSubstrate::new();
    let notifier = Arc::new(StubNotifier::default());
    let ctx = OrchestrationContext::new(
        config,
        Arc::clone(&remote) as _,
        Arc::clone(&substrate) as _,
        Arc::clone(&notifier) as _,
    );
    Harness {
        ctx,
        remote,
        substrate,
        notifier,
    }
}

impl Harness {
    /// Set both flags directly, without starting anything.
    pub async fn enable(&self, catcher: bool, tabber: bool) {
        let mut state = self.ctx.write().await;
        state.flags.catcher = catcher;
        state.flags.tabber = tabber;
    }

    pub async fn queue(&self) -> Vec<WorkItem> {
        self.ctx.read().await.queue.iter().cloned().collect()
    }

    pub async fn workers(&self) -> Vec<(TabHandle, WorkItem)> {
        self.ctx
            .read()
            .await
            .workers
            .iter()
            .map(|w| (w.tab, w.item.clone()))
            .collect()
    }
}
