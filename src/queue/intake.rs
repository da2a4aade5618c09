//! Pulling URLs out of pasted text.

use crate::queue::store::QueueStore;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s"'<>]+"#).expect("URL pattern is a valid regex")
});

/// Result of a bulk enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeReport {
    pub added: usize,
    pub duplicates: usize,
}

impl IntakeReport {
    pub fn found(&self) -> usize {
        self.added + self.duplicates
    }
}

/// Every http(s) URL in `text`, in order of appearance.
pub fn extract_urls(text: &str) -> Vec<String> {
    URL_PATTERN
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Enqueues every URL found in `text`.
///
/// A URL repeated within `text` counts as a duplicate after its first match.
pub fn enqueue_text(store: &mut QueueStore, text: &str) -> IntakeReport {
    let mut report = IntakeReport::default();
    for url in extract_urls(text) {
        if store.enqueue(&url) {
            report.added += 1;
        } else {
            report.duplicates += 1;
        }
    }
    report
}
