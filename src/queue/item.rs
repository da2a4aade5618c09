//! One queued URL and its state machine.

use crate::error::{ReelbatchError, Result};
use crate::pipeline::StageName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a queue item.
///
/// Only `waiting → processing → {completed | failed | skipped}` is allowed.
/// The string forms are shown to users and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Waiting,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Waiting => "waiting",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = ReelbatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "waiting" => Ok(ItemStatus::Waiting),
            "processing" => Ok(ItemStatus::Processing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            "skipped" => Ok(ItemStatus::Skipped),
            other => Err(ReelbatchError::Other(format!("unknown item status: {other}"))),
        }
    }
}

/// State change requested on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    SetStage,
    Succeed,
    Fail,
    Skip,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Transition::Start => "start",
            Transition::SetStage => "set the stage of",
            Transition::Succeed => "complete",
            Transition::Fail => "fail",
            Transition::Skip => "skip",
        })
    }
}

/// A transition was attempted from a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {attempted} an item that is {from}")]
pub struct TransitionError {
    pub from: ItemStatus,
    pub attempted: Transition,
}

/// One URL in the batch queue.
///
/// Items handed out by the scheduler are snapshots; changing a copy does not
/// affect the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    id: String,
    status: ItemStatus,
    current_stage: Option<StageName>,
    status_message: String,
    remarks: String,
    enqueued_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    attempts: u32,
}

impl QueueItem {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ItemStatus::Waiting,
            current_stage: None,
            status_message: String::new(),
            remarks: String::new(),
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            attempts: 0,
        }
    }

    /// Source URL; unique within the queue.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ItemStatus {
        self.status
    }

    /// Stage currently (or last) being run; `None` until started.
    pub fn current_stage(&self) -> Option<StageName> {
        self.current_stage
    }

    /// Terminal summary: success summary, error text or skip reason.
    pub fn remarks(&self) -> &str {
        &self.remarks
    }

    pub fn enqueued_at(&self) -> DateTime<Utc> {
        self.enqueued_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Total stage invocations, retries included.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Status message, shown only while processing or after a failure or skip.
    pub fn visible_status_message(&self) -> Option<&str> {
        match self.status {
            ItemStatus::Processing | ItemStatus::Failed | ItemStatus::Skipped
                if !self.status_message.is_empty() =>
            {
                Some(&self.status_message)
            }
            _ => None,
        }
    }

    fn require(
        &self,
        expected: ItemStatus,
        attempted: Transition,
    ) -> std::result::Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.status,
                attempted,
            })
        }
    }

    pub(crate) fn start(&mut self) -> std::result::Result<(), TransitionError> {
        self.require(ItemStatus::Waiting, Transition::Start)?;
        self.status = ItemStatus::Processing;
        self.started_at = Some(Utc::now());
        self.status_message = "Starting".to_string();
        Ok(())
    }

    pub(crate) fn set_stage(
        &mut self,
        stage: StageName,
        message: impl Into<String>,
    ) -> std::result::Result<(), TransitionError> {
        self.require(ItemStatus::Processing, Transition::SetStage)?;
        self.current_stage = Some(stage);
        self.status_message = message.into();
        Ok(())
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn succeed(
        &mut self,
        summary: impl Into<String>,
    ) -> std::result::Result<(), TransitionError> {
        self.require(ItemStatus::Processing, Transition::Succeed)?;
        self.finish(ItemStatus::Completed);
        self.status_message.clear();
        self.remarks = summary.into();
        Ok(())
    }

    pub(crate) fn fail(
        &mut self,
        message: impl Into<String>,
    ) -> std::result::Result<(), TransitionError> {
        self.require(ItemStatus::Processing, Transition::Fail)?;
        let message = message.into();
        self.finish(ItemStatus::Failed);
        self.status_message = message.clone();
        self.remarks = message;
        Ok(())
    }

    pub(crate) fn skip(
        &mut self,
        reason: impl Into<String>,
    ) -> std::result::Result<(), TransitionError> {
        self.require(ItemStatus::Processing, Transition::Skip)?;
        let reason = reason.into();
        self.finish(ItemStatus::Skipped);
        self.status_message = reason.clone();
        self.remarks = reason;
        Ok(())
    }

    fn finish(&mut self, status: ItemStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing(id: &str) -> QueueItem {
        let mut item = QueueItem::new(id);
        item.start().unwrap();
        item
    }

    #[test]
    fn test_new_item_is_waiting() {
        let item = QueueItem::new("https://example.com/v/1");
        assert_eq!(item.status(), ItemStatus::Waiting);
        assert_eq!(item.current_stage(), None);
        assert!(item.started_at().is_none());
        assert!(item.visible_status_message().is_none());
    }

    #[test]
    fn test_start_records_time() {
        let item = processing("u");
        assert_eq!(item.status(), ItemStatus::Processing);
        assert!(item.started_at().is_some());
        assert_eq!(item.visible_status_message(), Some("Starting"));
    }

    #[test]
    fn test_start_twice_rejected_and_unchanged() {
        let mut item = processing("u");
        let before = item.clone();
        let err = item.start().unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: ItemStatus::Processing,
                attempted: Transition::Start,
            }
        );
        assert_eq!(item, before);
    }

    #[test]
    fn test_fail_stores_message_twice() {
        let mut item = processing("u");
        item.fail("tts: quota exhausted").unwrap();
        assert_eq!(item.status(), ItemStatus::Failed);
        assert_eq!(item.remarks(), "tts: quota exhausted");
        assert_eq!(item.visible_status_message(), Some("tts: quota exhausted"));
        assert!(item.finished_at().is_some());
    }

    #[test]
    fn test_succeed_hides_status_message() {
        let mut item = processing("u");
        item.set_stage(StageName::Video, "Rendering video").unwrap();
        item.succeed("done").unwrap();
        assert_eq!(item.status(), ItemStatus::Completed);
        assert_eq!(item.remarks(), "done");
        assert!(item.visible_status_message().is_none());
        assert_eq!(item.current_stage(), Some(StageName::Video));
    }

    #[test]
    fn test_skip() {
        let mut item = processing("u");
        item.skip("cancelled").unwrap();
        assert_eq!(item.status(), ItemStatus::Skipped);
        assert_eq!(item.remarks(), "cancelled");
    }

    #[test]
    fn test_terminal_is_final() {
        let mut item = processing("u");
        item.succeed("ok").unwrap();
        assert!(item.fail("late").is_err());
        assert!(item.skip("late").is_err());
        assert!(item.start().is_err());
        assert!(item.set_stage(StageName::Tts, "x").is_err());
        assert_eq!(item.status(), ItemStatus::Completed);
    }

    #[test]
    fn test_waiting_cannot_finish() {
        let mut item = QueueItem::new("u");
        let err = item.succeed("ok").unwrap_err();
        assert_eq!(err.to_string(), "cannot complete an item that is waiting");
        assert_eq!(item.status(), ItemStatus::Waiting);
    }

    #[test]
    fn test_status_strings_are_literal() {
        let all = [
            (ItemStatus::Waiting, "waiting"),
            (ItemStatus::Processing, "processing"),
            (ItemStatus::Completed, "completed"),
            (ItemStatus::Failed, "failed"),
            (ItemStatus::Skipped, "skipped"),
        ];
        for (status, text) in all {
            assert_eq!(status.to_string(), text);
            assert_eq!(text.parse::<ItemStatus>().unwrap(), status);
            assert_eq!(serde_json::to_string(&status).unwrap(), format!("\"{text}\""));
        }
        assert!("done".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn test_attempts_count() {
        let mut item = processing("u");
        item.record_attempt();
        item.record_attempt();
        assert_eq!(item.attempts(), 2);
    }
}
