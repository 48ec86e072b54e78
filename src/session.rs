//! Signed-in session check.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::context::OrchestrationContext;
use crate::notify::{AlertKind, SESSION_LOST_MESSAGE};
use crate::remote::ProbeResponse;

/// Result of a session check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Authenticated,
    Unauthenticated,
    /// The probe itself failed; nothing is known.
    Indeterminate,
}

impl SessionStatus {
    /// Whether callers should carry on as if signed in.
    ///
    /// A failed probe is not evidence of a signed-out session, so only an
    /// explicit redirect stops anything.
    pub fn assume_signed_in(&self) -> bool {
        !matches!(self, Self::Unauthenticated)
    }
}

/// Probes the remote site for a signed-in session.
pub struct SessionMonitor {
    ctx: Arc<OrchestrationContext>,
}

impl SessionMonitor {
    pub fn new(ctx: Arc<OrchestrationContext>) -> Self {
        Self { ctx }
    }

    /// Probe the session. A signed-out session disables both features and
    /// raises a `SessionLost` alert.
    pub async fn check_session(&self) -> SessionStatus {
        match self.ctx.remote.probe_session().await {
            Ok(ProbeResponse::Redirect) => {
                warn!("Session probe was redirected, session is signed out");
                self.ctx
                    .notifier
                    .alert(AlertKind::SessionLost, SESSION_LOST_MESSAGE)
                    .await;
                self.ctx.disable_features().await;
                SessionStatus::Unauthenticated
            }
            Ok(ProbeResponse::Answered(status)) => {
                debug!(status, "Session probe answered");
                SessionStatus::Authenticated
            }
            Err(e) => {
                error!(error = %e, "Session check failed");
                SessionStatus::Indeterminate
            }
        }
    }
}
