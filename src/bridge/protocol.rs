//! Messages exchanged with the browser extension.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::notify::AlertKind;
use crate::worker::{ResponseEvent, TabHandle};

/// Messages from the extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    /// Changed settings, keyed by their settings-store name.
    Settings { changes: Map<String, Value> },
    TabClosed { tab: TabHandle },
    TabTitleChanged { tab: TabHandle, title: String },
    ResponseReceived(ResponseEvent),
    /// Answer to a `command`.
    Reply(Reply),
}

/// The extension's answer to one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Messages to the extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// A tab operation; the extension answers with a `reply` carrying `id`.
    Command { id: u64, command: CommandOp },
    Alert { kind: AlertKind, message: String },
    /// Settings the core changed itself, to be written back to storage.
    PersistSettings { changes: Map<String, Value> },
}

/// Tab operations the extension performs.
///
/// Reply results: `create_tab` gives the new tab id, `get_tab` a
/// `{title, position}` object or null when the tab is gone, `query_tabs` an
/// array of tab ids and `active_tab` the focused position or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "args", rename_all = "snake_case")]
pub enum CommandOp {
    CreateTab {
        url: String,
        index: usize,
        active: bool,
    },
    GetTab {
        tab: TabHandle,
    },
    CloseTabs {
        tabs: Vec<TabHandle>,
    },
    FocusTab {
        tab: TabHandle,
    },
    QueryTabs,
    ActiveTab,
}

impl CommandOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateTab { .. } => "create_tab",
            Self::GetTab { .. } => "get_tab",
            Self::CloseTabs { .. } => "close_tabs",
            Self::FocusTab { .. } => "focus_tab",
            Self::QueryTabs => "query_tabs",
            Self::ActiveTab => "active_tab",
        }
    }
}
