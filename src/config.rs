//! Configuration types.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::error::ConfigError;

/// Default remote site.
pub const DEFAULT_BASE_URL: &str = "https://worker.mturk.com";

/// Longest tick or queue-check interval accepted.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

static PROJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"projects/([^/?#]+)").expect("static regex"));

/// Orchestration settings shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestrationConfig {
    /// Maximum number of concurrently open worker tabs.
    pub max_workers: usize,
    /// Queue length at which claiming pauses.
    pub max_queue: usize,
    /// Claim and placement cadence.
    pub tick_interval: Duration,
    /// Queue refresh cadence.
    pub queue_check_interval: Duration,
    /// Project identifier claims are made against.
    pub claim_target: String,
    /// Scheme and host of the remote site, without a trailing slash.
    pub base_url: String,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            max_queue: 10,
            tick_interval: Duration::from_secs(1),
            queue_check_interval: Duration::from_secs(15),
            claim_target: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl OrchestrationConfig {
    /// Build from `QT_*` environment variables, falling back to defaults for
    /// anything missing or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_workers = env_parsed("QT_MAX_WORKERS").unwrap_or(defaults.max_workers);
        let max_queue = env_parsed("QT_MAX_QUEUE").unwrap_or(defaults.max_queue);

        let tick_interval = env_parsed::<f64>("QT_TICK_SECS")
            .and_then(|secs| seconds("QT_TICK_SECS", secs).ok())
            .unwrap_or(defaults.tick_interval);

        let queue_check_interval = env_parsed::<f64>("QT_QUEUE_CHECK_SECS")
            .and_then(|secs| seconds("QT_QUEUE_CHECK_SECS", secs).ok())
            .unwrap_or(defaults.queue_check_interval);

        let claim_target = std::env::var("QT_CLAIM_TARGET")
            .map(|s| normalize_claim_target(&s))
            .unwrap_or_default();

        let base_url = std::env::var("QT_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.base_url);

        Self {
            max_workers,
            max_queue,
            tick_interval,
            queue_check_interval,
            claim_target,
            base_url,
        }
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, interval) in [
            ("tick_interval", self.tick_interval),
            ("queue_check_interval", self.queue_check_interval),
        ] {
            if interval.is_zero() {
                return Err(invalid(key, "must be greater than zero"));
            }
            if interval > MAX_INTERVAL {
                return Err(invalid(key, "must be at most one day"));
            }
        }
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| invalid("base_url", &e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("base_url", "scheme must be http or https"));
        }
        Ok(())
    }

    /// Apply a single settings change.
    pub fn apply(&mut self, change: &SettingsChange) {
        match change {
            SettingsChange::MaxWorkers(n) => self.max_workers = *n,
            SettingsChange::MaxQueue(n) => self.max_queue = *n,
            SettingsChange::TickInterval(d) => self.tick_interval = *d,
            SettingsChange::QueueCheckInterval(d) => self.queue_check_interval = *d,
            SettingsChange::ClaimTarget(t) => self.claim_target = normalize_claim_target(t),
            SettingsChange::CatcherEnabled(_) | SettingsChange::TabberEnabled(_) => {}
        }
    }
}

/// The two independently toggled features.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Claiming new items.
    pub catcher: bool,
    /// Opening and managing worker tabs.
    pub tabber: bool,
}

impl FeatureFlags {
    pub fn any(&self) -> bool {
        self.catcher || self.tabber
    }
}

/// A change to one persisted setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsChange {
    CatcherEnabled(bool),
    TabberEnabled(bool),
    MaxWorkers(usize),
    MaxQueue(usize),
    TickInterval(Duration),
    QueueCheckInterval(Duration),
    ClaimTarget(String),
}

impl SettingsChange {
    /// Parse a change from the settings store's key and JSON value.
    pub fn from_key(key: &str, value: &Value) -> Result<Self, ConfigError> {
        let change = match key {
            "catcherEnabled" => Self::CatcherEnabled(as_bool(key, value)?),
            "tabberEnabled" => Self::TabberEnabled(as_bool(key, value)?),
            "maxTabs" => Self::MaxWorkers(as_count(key, value)?),
            "maxHitsInQueue" => Self::MaxQueue(as_count(key, value)?),
            "refreshRate" => Self::TickInterval(seconds(key, as_f64(key, value)?)?),
            "queueCheck" => Self::QueueCheckInterval(seconds(key, as_f64(key, value)?)?),
            "groupId" => Self::ClaimTarget(
                value
                    .as_str()
                    .ok_or_else(|| invalid(key, "expected a string"))?
                    .to_string(),
            ),
            other => return Err(ConfigError::UnknownKey(other.to_string())),
        };
        Ok(change)
    }

    /// The settings store's key for this change.
    pub fn key(&self) -> &'static str {
        match self {
            Self::CatcherEnabled(_) => "catcherEnabled",
            Self::TabberEnabled(_) => "tabberEnabled",
            Self::MaxWorkers(_) => "maxTabs",
            Self::MaxQueue(_) => "maxHitsInQueue",
            Self::TickInterval(_) => "refreshRate",
            Self::QueueCheckInterval(_) => "queueCheck",
            Self::ClaimTarget(_) => "groupId",
        }
    }

    /// The JSON value the settings store keeps for this change.
    pub fn value(&self) -> Value {
        match self {
            Self::CatcherEnabled(b) | Self::TabberEnabled(b) => Value::Bool(*b),
            Self::MaxWorkers(n) | Self::MaxQueue(n) => Value::from(*n),
            Self::TickInterval(d) | Self::QueueCheckInterval(d) => Value::from(d.as_secs_f64()),
            Self::ClaimTarget(t) => Value::String(t.clone()),
        }
    }
}

/// Reduce a pasted project link to its identifier.
///
/// `https://host/projects/ABC123/tasks/accept_random` becomes `ABC123`;
/// anything without a `projects/` segment is returned trimmed.
pub fn normalize_claim_target(input: &str) -> String {
    let input = input.trim();
    if input.contains("/projects/") {
        if let Some(caps) = PROJECT_ID.captures(input) {
            return caps[1].to_string();
        }
    }
    input.to_string()
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Ignoring unparsable setting");
            None
        }
    }
}

fn seconds(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid(key, "must be a positive number of seconds"));
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(interval) if interval <= MAX_INTERVAL => Ok(interval),
        _ => Err(invalid(key, "must be at most one day")),
    }
}

fn as_bool(key: &str, value: &Value) -> Result<bool, ConfigError> {
    value
        .as_bool()
        .ok_or_else(|| invalid(key, "expected a boolean"))
}

/// Numbers may arrive as numeric strings from form inputs.
fn as_f64(key: &str, value: &Value) -> Result<f64, ConfigError> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| invalid(key, "expected a number"))
}

fn as_count(key: &str, value: &Value) -> Result<usize, ConfigError> {
    let n = as_f64(key, value)?;
    if !n.is_finite() || n < 0.0 {
        return Err(invalid(key, "expected a non-negative integer"));
    }
    Ok(n as usize)
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}
