//! End-to-end tests over the native-messaging bridge.
//!
//! Each test wires the orchestrator to a fake extension through duplex pipes.
//! The fake keeps a small tab table, answers every command, and reports tab
//! closes back the way the browser does.

mod common;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use common::*;
use queue_tabber::bridge::{self, BridgeHost, read_message, write_message};
use queue_tabber::config::OrchestrationConfig;
use queue_tabber::context::OrchestrationContext;
use queue_tabber::orchestrator::Orchestrator;
use queue_tabber::remote::ProbeResponse;

#[derive(Debug, Clone)]
struct FakeTab {
    title: String,
    position: usize,
}

/// Browser side of the bridge.
struct FakeExtension {
    inject: mpsc::Sender<Value>,
    seen: Arc<Mutex<Vec<Value>>>,
    tabs: Arc<Mutex<BTreeMap<u64, FakeTab>>>,
    writer: JoinHandle<()>,
}

impl FakeExtension {
    fn spawn(mut from_host: DuplexStream, mut to_host: DuplexStream) -> Self {
        let (inject, mut outgoing) = mpsc::channel::<Value>(64);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let tabs = Arc::new(Mutex::new(BTreeMap::new()));

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing.recv().await {
                if write_message(&mut to_host, &message).await.is_err() {
                    break;
                }
            }
        });

        {
            let inject = inject.clone();
            let seen = Arc::clone(&seen);
            let tabs = Arc::clone(&tabs);
            tokio::spawn(async move {
                let mut next_id = 500u64;
                while let Ok(Some(message)) = read_message::<_, Value>(&mut from_host).await {
                    seen.lock().unwrap().push(message.clone());
                    if message["type"] != "command" {
                        continue;
                    }
                    let (result, closed) = answer(&message["command"], &tabs, &mut next_id);
                    let reply = json!({"type": "reply", "id": message["id"], "result": result});
                    if inject.send(reply).await.is_err() {
                        break;
                    }
                    for tab in closed {
                        let _ = inject.send(json!({"type": "tab_closed", "tab": tab})).await;
                    }
                }
            });
        }

        Self {
            inject,
            seen,
            tabs,
            writer,
        }
    }

    async fn send(&self, message: Value) {
        self.inject.send(message).await.unwrap();
    }

    fn seen_of_type(&self, kind: &str) -> Vec<Value> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m["type"] == kind)
            .cloned()
            .collect()
    }

    fn commands(&self, op: &str) -> Vec<Value> {
        self.seen_of_type("command")
            .into_iter()
            .filter(|m| m["command"]["op"] == op)
            .collect()
    }

    fn tab_ids(&self) -> Vec<u64> {
        self.tabs.lock().unwrap().keys().copied().collect()
    }

    fn set_title(&self, tab: u64, title: &str) {
        if let Some(t) = self.tabs.lock().unwrap().get_mut(&tab) {
            t.title = title.to_string();
        }
    }

    /// Close the host's stdin.
    fn disconnect(&self) {
        self.writer.abort();
    }
}

/// Perform one command against the tab table. Returns the reply result and
/// the tabs it closed.
fn answer(
    command: &Value,
    tabs: &Mutex<BTreeMap<u64, FakeTab>>,
    next_id: &mut u64,
) -> (Value, Vec<u64>) {
    let args = &command["args"];
    let mut tabs = tabs.lock().unwrap();
    match command["op"].as_str().unwrap_or_default() {
        "create_tab" => {
            let id = *next_id;
            *next_id += 1;
            tabs.insert(
                id,
                FakeTab {
                    title: "Task".to_string(),
                    position: args["index"].as_u64().unwrap_or_default() as usize,
                },
            );
            (json!(id), Vec::new())
        }
        "get_tab" => {
            let tab = args["tab"].as_u64().unwrap_or_default();
            let info = tabs
                .get(&tab)
                .map(|t| json!({"title": t.title, "position": t.position}));
            (info.unwrap_or(Value::Null), Vec::new())
        }
        "close_tabs" => {
            let closed: Vec<u64> = args["tabs"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_u64)
                .filter(|id| tabs.remove(id).is_some())
                .collect();
            (Value::Null, closed)
        }
        "query_tabs" => (json!(tabs.keys().collect::<Vec<_>>()), Vec::new()),
        "active_tab" => (json!(0), Vec::new()),
        _ => (Value::Null, Vec::new()),
    }
}

struct Stack {
    ctx: Arc<OrchestrationContext>,
    remote: Arc<StubRemote>,
    ext: FakeExtension,
    running: JoinHandle<()>,
}

async fn start(config: OrchestrationConfig, remote: Arc<StubRemote>) -> Stack {
    let (host_in, ext_out) = tokio::io::duplex(64 * 1024);
    let (ext_in, host_out) = tokio::io::duplex(64 * 1024);

    let (outbound_tx, outbound_rx) = mpsc::channel(bridge::OUTBOUND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(64);
    let host = BridgeHost::new(outbound_tx.clone());

    let ctx = OrchestrationContext::new(
        config,
        Arc::clone(&remote) as _,
        Arc::clone(&host) as _,
        Arc::clone(&host) as _,
    );
    bridge::spawn_settings_forwarder(&ctx, outbound_tx);
    tokio::spawn(bridge::run_writer(host_out, outbound_rx));
    tokio::spawn(bridge::run_reader(host_in, Arc::clone(&host), event_tx));

    let ext = FakeExtension::spawn(ext_in, ext_out);

    let orchestrator = Orchestrator::new(Arc::clone(&ctx));
    orchestrator.initialize().await;
    let running = tokio::spawn(orchestrator.run(event_rx));

    Stack {
        ctx,
        remote,
        ext,
        running,
    }
}

fn fast_config() -> OrchestrationConfig {
    OrchestrationConfig {
        tick_interval: Duration::from_millis(20),
        ..config()
    }
}

/// Wait for `check` to hold, failing the test after `TEST_TIMEOUT`.
async fn eventually(mut check: impl AsyncFnMut() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !check().await {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn startup_reset_is_persisted() {
    let stack = start(fast_config(), StubRemote::new()).await;

    eventually(async || stack.ext.seen_of_type("persist_settings").len() == 2).await;
    let persisted = stack.ext.seen_of_type("persist_settings");
    assert_eq!(persisted[0]["changes"], json!({"catcherEnabled": false}));
    assert_eq!(persisted[1]["changes"], json!({"tabberEnabled": false}));
}

#[tokio::test]
async fn worker_lifecycle_over_the_bridge() {
    let remote = StubRemote::new();
    remote.set_listing(&["A"]);
    let stack = start(fast_config(), remote).await;

    // Unknown message types are skipped without dropping the connection
    stack.ext.send(json!({"type": "bogus"})).await;
    stack
        .ext
        .send(json!({"type": "settings", "changes": {"tabberEnabled": true}}))
        .await;

    eventually(async || stack.ctx.read().await.workers.len() == 1).await;
    let tabs = stack.ext.tab_ids();
    assert_eq!(tabs.len(), 1);
    let created = stack.ext.commands("create_tab");
    assert_eq!(
        created[0]["command"]["args"]["url"],
        json!(item("A").as_str())
    );
    assert_eq!(created[0]["command"]["args"]["index"], json!(1));
    assert_eq!(created[0]["command"]["args"]["active"], json!(false));

    eventually(async || !stack.ext.commands("focus_tab").is_empty()).await;
    assert_eq!(
        stack.ext.commands("focus_tab")[0]["command"]["args"]["tab"],
        json!(tabs[0])
    );

    stack
        .ext
        .send(json!({"type": "settings", "changes": {"tabberEnabled": false}}))
        .await;
    eventually(async || stack.ext.tab_ids().is_empty()).await;
    eventually(async || stack.ctx.read().await.workers.is_empty()).await;

    stack.ext.disconnect();
    timeout(TEST_TIMEOUT, stack.running)
        .await
        .expect("orchestrator did not stop on EOF")
        .unwrap();
}

#[tokio::test]
async fn submission_over_the_bridge_completes_item() {
    let remote = StubRemote::new();
    remote.set_listing(&["A", "B"]);
    let stack = start(fast_config(), remote).await;

    stack
        .ext
        .send(json!({"type": "settings", "changes": {"tabberEnabled": true}}))
        .await;
    eventually(async || stack.ctx.read().await.workers.len() == 2).await;
    let tabs = stack.ext.tab_ids();

    stack
        .ext
        .send(json!({
            "type": "response_received",
            "tab": tabs[0],
            "method": "POST",
            "status": 302,
            "url": format!("{BASE}/projects/{TARGET}/tasks/A/submit?assignment_id=A")
        }))
        .await;

    eventually(async || stack.ctx.read().await.last_completed.is_some()).await;
    eventually(async || stack.ext.tab_ids() == vec![tabs[1]]).await;
    let queued: Vec<_> = stack.ctx.read().await.queue.iter().cloned().collect();
    assert_eq!(queued, vec![item("B")]);
    let focused: Vec<Value> = stack
        .ext
        .commands("focus_tab")
        .into_iter()
        .map(|c| c["command"]["args"]["tab"].clone())
        .collect();
    assert!(focused.contains(&json!(tabs[1])));
}

#[tokio::test]
async fn challenge_page_raises_alert() {
    let remote = StubRemote::new();
    remote.set_listing(&["A"]);
    let stack = start(fast_config(), remote).await;

    stack
        .ext
        .send(json!({"type": "settings", "changes": {"tabberEnabled": true}}))
        .await;
    eventually(async || stack.ctx.read().await.workers.len() == 1).await;
    let tab = stack.ext.tab_ids()[0];

    stack.ext.set_title(tab, "Server Busy");
    stack
        .ext
        .send(json!({"type": "tab_title_changed", "tab": tab, "title": "Server Busy"}))
        .await;

    eventually(async || !stack.ext.seen_of_type("alert").is_empty()).await;
    let alert = &stack.ext.seen_of_type("alert")[0];
    assert_eq!(alert["kind"], json!("interruption"));
}

#[tokio::test]
async fn signed_out_session_alerts_and_persists() {
    let remote = StubRemote::new();
    remote.set_probe(Some(ProbeResponse::Redirect));
    let stack = start(fast_config(), Arc::clone(&remote)).await;
    eventually(async || stack.ext.seen_of_type("persist_settings").len() == 2).await;

    stack
        .ext
        .send(json!({"type": "settings", "changes": {"catcherEnabled": true, "groupId": "https://worker.mturk.com/projects/XYZ/tasks"}}))
        .await;

    eventually(async || !stack.ext.seen_of_type("alert").is_empty()).await;
    assert_eq!(stack.ext.seen_of_type("alert")[0]["kind"], json!("session_lost"));
    eventually(async || stack.ext.seen_of_type("persist_settings").len() == 4).await;
    assert!(!stack.ctx.flags().await.any());
    assert_eq!(stack.ctx.config().await.claim_target, "XYZ");
    assert_eq!(
        stack.remote.claim_calls.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}
