//! User-facing alerts.
//!
//! Playing sounds or speech is the browser side's job; the core only says
//! what happened.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Spoken when the session is found signed out.
pub const SESSION_LOST_MESSAGE: &str = "Queue Tabber stopped. You are logged out.";

/// Shown when a worker lands on a challenge page.
pub const INTERRUPTION_MESSAGE: &str = "Captcha detected.";

/// What an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// A worker tab hit a challenge page.
    Interruption,
    /// The remote session is signed out; both features were disabled.
    SessionLost,
}

/// Delivers alerts to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn alert(&self, kind: AlertKind, message: &str);
}
