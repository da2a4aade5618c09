//! Ordered collection of queue items keyed by URL.

use crate::queue::item::{ItemStatus, QueueItem};
use serde::Serialize;
use std::fmt;

/// Number of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.waiting + self.processing + self.completed + self.failed + self.skipped
    }

    /// Items in a terminal state.
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Share of all tracked items that completed successfully, 0–100.
    pub fn overall_percent(&self) -> u8 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        ((self.completed * 100) / total) as u8
    }

    fn add(&mut self, status: ItemStatus) {
        match status {
            ItemStatus::Waiting => self.waiting += 1,
            ItemStatus::Processing => self.processing += 1,
            ItemStatus::Completed => self.completed += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Skipped => self.skipped += 1,
        }
    }
}

impl fmt::Display for QueueCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} waiting, {} processing, {} completed, {} failed, {} skipped",
            self.waiting, self.processing, self.completed, self.failed, self.skipped
        )
    }
}

/// Items in arrival order. At most one item is `processing` at a time.
#[derive(Debug, Clone, Default)]
pub struct QueueStore {
    items: Vec<QueueItem>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `url` as a waiting item.
    ///
    /// Returns false for blank input and for URLs already tracked in any state;
    /// a finished URL must be purged before it can be queued again.
    pub fn enqueue(&mut self, url: &str) -> bool {
        let url = url.trim();
        if url.is_empty() || self.contains(url) {
            return false;
        }
        self.items.push(QueueItem::new(url));
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.position(url.trim()).is_some()
    }

    /// Removes `url` only if it is still waiting.
    pub fn remove_waiting(&mut self, url: &str) -> bool {
        match self.position(url.trim()) {
            Some(index) if self.items[index].status() == ItemStatus::Waiting => {
                self.items.remove(index);
                true
            }
            _ => false,
        }
    }

    /// Drops every waiting item. Returns how many were removed.
    pub fn clear_waiting(&mut self) -> usize {
        self.retain(|item| item.status() != ItemStatus::Waiting)
    }

    /// Drops every finished item, keeping waiting and processing ones.
    pub fn clear_finished(&mut self) -> usize {
        self.retain(|item| !item.is_terminal())
    }

    /// Removes a finished item so its URL can be queued again.
    pub fn purge(&mut self, url: &str) -> bool {
        match self.position(url.trim()) {
            Some(index) if self.items[index].is_terminal() => {
                self.items.remove(index);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, url: &str) -> Option<&QueueItem> {
        self.position(url.trim()).map(|index| &self.items[index])
    }

    pub(crate) fn get_mut(&mut self, url: &str) -> Option<&mut QueueItem> {
        self.position(url.trim()).map(|index| &mut self.items[index])
    }

    /// First waiting item in arrival order.
    pub fn next_waiting(&self) -> Option<&QueueItem> {
        self.items
            .iter()
            .find(|item| item.status() == ItemStatus::Waiting)
    }

    pub fn processing(&self) -> Option<&QueueItem> {
        self.items
            .iter()
            .find(|item| item.status() == ItemStatus::Processing)
    }

    /// Starts the head waiting item and returns its URL.
    ///
    /// Returns `None` while another item is processing.
    pub(crate) fn claim_next(&mut self) -> Option<String> {
        if self.processing().is_some() {
            return None;
        }
        let item = self
            .items
            .iter_mut()
            .find(|item| item.status() == ItemStatus::Waiting)?;
        item.start().ok()?;
        Some(item.id().to_string())
    }

    /// True while any item is waiting or processing.
    pub fn has_pending(&self) -> bool {
        self.items.iter().any(|item| !item.is_terminal())
    }

    /// Copies of all items in arrival order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items.clone()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for item in &self.items {
            counts.add(item.status());
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn position(&self, url: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == url)
    }

    fn retain(&mut self, keep: impl Fn(&QueueItem) -> bool) -> usize {
        let before = self.items.len();
        self.items.retain(|item| keep(item));
        before - self.items.len()
    }
}
