//! The tab substrate workers run on.
//!
//! The browser owns the tabs; the orchestrator drives them through
//! `WorkerSubstrate` and learns about changes through `SubstrateEvent`s.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SubstrateError;

/// Opaque identifier of a browser tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabHandle(pub u64);

impl fmt::Display for TabHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab:{}", self.0)
    }
}

/// Live details of a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub title: String,
    /// Index of the tab within its window.
    pub position: usize,
}

/// A response observed on a tab's top-level navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub tab: TabHandle,
    pub method: String,
    pub status: u16,
    pub url: String,
}

/// Notifications pushed by the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstrateEvent {
    /// A tab was closed, by us or by anything else.
    TabClosed(TabHandle),
    /// A tab's title changed.
    TitleChanged { tab: TabHandle, title: String },
    /// A tab received response headers for a navigation.
    ResponseReceived(ResponseEvent),
}

/// Operations on browser tabs.
#[async_trait]
pub trait WorkerSubstrate: Send + Sync {
    /// Open `url` in a new tab at `position`, focused if `active`.
    async fn create_tab(
        &self,
        url: &str,
        position: usize,
        active: bool,
    ) -> Result<TabHandle, SubstrateError>;

    /// Look up a tab. `Ok(None)` means the tab no longer exists.
    async fn get_tab(&self, tab: TabHandle) -> Result<Option<TabInfo>, SubstrateError>;

    /// Close the given tabs.
    async fn close_tabs(&self, tabs: &[TabHandle]) -> Result<(), SubstrateError>;

    /// Bring a tab to the foreground.
    async fn focus_tab(&self, tab: TabHandle) -> Result<(), SubstrateError>;

    /// Every tab currently open.
    async fn open_tabs(&self) -> Result<HashSet<TabHandle>, SubstrateError>;

    /// Position of the focused tab in the current window, if any.
    async fn focused_position(&self) -> Result<Option<usize>, SubstrateError>;

    /// Close a single tab.
    async fn close_tab(&self, tab: TabHandle) -> Result<(), SubstrateError> {
        self.close_tabs(&[tab]).await
    }
}
