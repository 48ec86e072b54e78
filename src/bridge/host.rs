//! The native-messaging host: the extension is the worker substrate, the
//! notifier and the settings store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::framing::{read_message, write_message};
use super::protocol::{CommandOp, Inbound, Outbound, Reply};
use crate::config::SettingsChange;
use crate::context::OrchestrationContext;
use crate::error::{BridgeError, SubstrateError};
use crate::notify::{AlertKind, Notifier};
use crate::orchestrator::OrchestratorEvent;
use crate::worker::{SubstrateEvent, TabHandle, TabInfo, WorkerSubstrate};

/// How long a command waits for its reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Extension side of the orchestrator.
///
/// Commands go out through the outbound channel; their replies come back
/// through [`run_reader`] and are matched up by id.
pub struct BridgeHost {
    outbound: mpsc::Sender<Outbound>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_id: AtomicU64,
    reply_timeout: Duration,
}

impl BridgeHost {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Arc<Self> {
        Self::with_reply_timeout(outbound, DEFAULT_REPLY_TIMEOUT)
    }

    pub fn with_reply_timeout(outbound: mpsc::Sender<Outbound>, reply_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reply_timeout,
        })
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a command and wait for its result.
    async fn request(&self, command: CommandOp) -> Result<Value, SubstrateError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = command.name();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);

        if self
            .outbound
            .send(Outbound::Command { id, command })
            .await
            .is_err()
        {
            self.pending().remove(&id);
            return Err(SubstrateError::Disconnected);
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(reply)) => match reply.error {
                Some(reason) => Err(SubstrateError::OperationFailed {
                    op: op.to_string(),
                    reason,
                }),
                None => Ok(reply.result),
            },
            Ok(Err(_)) => Err(SubstrateError::Disconnected),
            Err(_) => {
                self.pending().remove(&id);
                Err(SubstrateError::OperationFailed {
                    op: op.to_string(),
                    reason: format!("no reply within {:?}", self.reply_timeout),
                })
            }
        }
    }

    /// Hand a reply to the command waiting for it. Returns false if nothing
    /// was waiting.
    pub fn resolve(&self, reply: Reply) -> bool {
        let Some(tx) = self.pending().remove(&reply.id) else {
            debug!(id = reply.id, "Reply for unknown command");
            return false;
        };
        tx.send(reply).is_ok()
    }

    /// Fail every outstanding command with `Disconnected`.
    pub fn fail_pending(&self) {
        self.pending().clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

fn decode<T: serde::de::DeserializeOwned>(op: &str, value: Value) -> Result<T, SubstrateError> {
    serde_json::from_value(value).map_err(|e| SubstrateError::OperationFailed {
        op: op.to_string(),
        reason: format!("unexpected reply: {e}"),
    })
}

#[async_trait]
impl WorkerSubstrate for BridgeHost {
    async fn create_tab(
        &self,
        url: &str,
        position: usize,
        active: bool,
    ) -> Result<TabHandle, SubstrateError> {
        let result = self
            .request(CommandOp::CreateTab {
                url: url.to_string(),
                index: position,
                active,
            })
            .await?;
        decode("create_tab", result)
    }

    async fn get_tab(&self, tab: TabHandle) -> Result<Option<TabInfo>, SubstrateError> {
        let result = self.request(CommandOp::GetTab { tab }).await?;
        decode("get_tab", result)
    }

    async fn close_tabs(&self, tabs: &[TabHandle]) -> Result<(), SubstrateError> {
        if tabs.is_empty() {
            return Ok(());
        }
        self.request(CommandOp::CloseTabs {
            tabs: tabs.to_vec(),
        })
        .await?;
        Ok(())
    }

    async fn focus_tab(&self, tab: TabHandle) -> Result<(), SubstrateError> {
        self.request(CommandOp::FocusTab { tab }).await?;
        Ok(())
    }

    async fn open_tabs(&self) -> Result<HashSet<TabHandle>, SubstrateError> {
        let result = self.request(CommandOp::QueryTabs).await?;
        decode("query_tabs", result)
    }

    async fn focused_position(&self) -> Result<Option<usize>, SubstrateError> {
        let result = self.request(CommandOp::ActiveTab).await?;
        decode("active_tab", result)
    }
}

#[async_trait]
impl Notifier for BridgeHost {
    async fn alert(&self, kind: AlertKind, message: &str) {
        info!(kind = ?kind, "{message}");
        let alert = Outbound::Alert {
            kind,
            message: message.to_string(),
        };
        if self.outbound.send(alert).await.is_err() {
            warn!(kind = ?kind, "Bridge closed, alert dropped");
        }
    }
}

/// Read extension messages until EOF, turning them into orchestrator events.
///
/// Sends `Shutdown` when the extension goes away. A message that fails to
/// decode is skipped; framing errors end the reader.
pub async fn run_reader<R>(
    mut reader: R,
    host: Arc<BridgeHost>,
    events: mpsc::Sender<OrchestratorEvent>,
) -> Result<(), BridgeError>
where
    R: AsyncRead + Unpin,
{
    let result = loop {
        let message = match read_message::<_, Inbound>(&mut reader).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                info!("Extension disconnected");
                break Ok(());
            }
            Err(BridgeError::Json(e)) => {
                warn!(error = %e, "Skipping malformed message");
                continue;
            }
            Err(e) => break Err(e),
        };

        let forwarded = match message {
            Inbound::Reply(reply) => {
                host.resolve(reply);
                Vec::new()
            }
            Inbound::Settings { changes } => changes
                .iter()
                .filter_map(|(key, value)| match SettingsChange::from_key(key, value) {
                    Ok(change) => Some(OrchestratorEvent::Settings(change)),
                    Err(e) => {
                        warn!(error = %e, "Ignoring setting");
                        None
                    }
                })
                .collect(),
            Inbound::TabClosed { tab } => {
                vec![OrchestratorEvent::Substrate(SubstrateEvent::TabClosed(tab))]
            }
            Inbound::TabTitleChanged { tab, title } => {
                vec![OrchestratorEvent::Substrate(SubstrateEvent::TitleChanged {
                    tab,
                    title,
                })]
            }
            Inbound::ResponseReceived(response) => {
                vec![OrchestratorEvent::Substrate(
                    SubstrateEvent::ResponseReceived(response),
                )]
            }
        };

        for event in forwarded {
            if events.send(event).await.is_err() {
                host.fail_pending();
                return Ok(());
            }
        }
    };

    host.fail_pending();
    let _ = events.send(OrchestratorEvent::Shutdown).await;
    result
}

/// Write outbound messages until every sender is gone.
pub async fn run_writer<W>(mut writer: W, mut outbound: mpsc::Receiver<Outbound>) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = outbound.recv().await {
        write_message(&mut writer, &message).await?;
    }
    Ok(())
}

/// Persist every setting the core changes on its own.
pub fn spawn_settings_forwarder(
    ctx: &OrchestrationContext,
    outbound: mpsc::Sender<Outbound>,
) -> JoinHandle<()> {
    let mut changes = ctx.subscribe_settings();
    tokio::spawn(async move {
        loop {
            let change = match changes.recv().await {
                Ok(change) => change,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Settings forwarder lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let mut map = Map::new();
            map.insert(change.key().to_string(), change.value());
            if outbound
                .send(Outbound::PersistSettings { changes: map })
                .await
                .is_err()
            {
                break;
            }
        }
    })
}
