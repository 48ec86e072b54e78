//! Work items and the ordered local queue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A claimable task, identified by its canonical claim URL.
///
/// Two items are the same task iff their canonical URLs are equal. The remote
/// listing decorates task URLs with tracking parameters and a `.json` format
/// suffix; both are stripped on construction so every entry point compares
/// the same way.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItem(String);

impl WorkItem {
    /// Canonicalize a raw task URL into a work item.
    pub fn canonicalize(raw: &str) -> Self {
        let head = raw.split('&').next().unwrap_or_default();
        Self(head.replacen(".json", "", 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered, duplicate-free list of outstanding work items.
///
/// Order is discovery order from the remote source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Queue {
    items: Vec<WorkItem>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item. Returns false if it was already queued.
    pub fn push(&mut self, item: WorkItem) -> bool {
        if self.items.contains(&item) {
            return false;
        }
        self.items.push(item);
        true
    }

    /// Remove an item. Returns false if it was not queued.
    pub fn remove(&mut self, item: &WorkItem) -> bool {
        match self.items.iter().position(|i| i == item) {
            Some(index) => {
                self.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, item: &WorkItem) -> bool {
        self.items.contains(item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.iter()
    }
}

impl FromIterator<WorkItem> for Queue {
    fn from_iter<I: IntoIterator<Item = WorkItem>>(iter: I) -> Self {
        let mut queue = Queue::new();
        for item in iter {
            queue.push(item);
        }
        queue
    }
}
