//! Progress observers.
//!
//! The scheduler reports every state change through a [`ProgressSink`]. Sinks are
//! called from the worker thread, never while the queue lock is held, so a sink
//! may call back into the scheduler (e.g. `snapshot`).

use crate::pipeline::stage::StageName;
use crate::queue::ItemStatus;
use crate::defaults;
use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Receives scheduler progress. Implementations must be cheap and non-blocking.
pub trait ProgressSink: Send + Sync {
    fn on_item_started(&self, _item_id: &str) {}

    fn on_stage_started(&self, item_id: &str, stage: StageName);

    fn on_stage_completed(&self, _item_id: &str, _stage: StageName) {}

    /// A credential was rejected and the stage is about to run again.
    fn on_stage_retried(
        &self,
        item_id: &str,
        stage: StageName,
        attempt: u32,
        blocked_credential: &str,
    );

    fn on_item_terminal(&self, item_id: &str, status: ItemStatus, remark: &str);
}

/// Serializable form of a progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    ItemStarted {
        item: String,
    },
    StageStarted {
        item: String,
        stage: StageName,
    },
    StageCompleted {
        item: String,
        stage: StageName,
    },
    StageRetried {
        item: String,
        stage: StageName,
        attempt: u32,
        blocked_credential: String,
    },
    ItemTerminal {
        item: String,
        status: ItemStatus,
        remark: String,
    },
}

impl SchedulerEvent {
    /// Item the event belongs to.
    pub fn item(&self) -> &str {
        match self {
            SchedulerEvent::ItemStarted { item }
            | SchedulerEvent::StageStarted { item, .. }
            | SchedulerEvent::StageCompleted { item, .. }
            | SchedulerEvent::StageRetried { item, .. }
            | SchedulerEvent::ItemTerminal { item, .. } => item,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Sink that consumes whole [`SchedulerEvent`] values.
///
/// Every `EventSink` is also a [`ProgressSink`].
pub trait EventSink: Send + Sync {
    fn push(&self, event: SchedulerEvent);
}

impl<T: EventSink> ProgressSink for T {
    fn on_item_started(&self, item_id: &str) {
        self.push(SchedulerEvent::ItemStarted {
            item: item_id.to_string(),
        });
    }

    fn on_stage_started(&self, item_id: &str, stage: StageName) {
        self.push(SchedulerEvent::StageStarted {
            item: item_id.to_string(),
            stage,
        });
    }

    fn on_stage_completed(&self, item_id: &str, stage: StageName) {
        self.push(SchedulerEvent::StageCompleted {
            item: item_id.to_string(),
            stage,
        });
    }

    fn on_stage_retried(
        &self,
        item_id: &str,
        stage: StageName,
        attempt: u32,
        blocked_credential: &str,
    ) {
        self.push(SchedulerEvent::StageRetried {
            item: item_id.to_string(),
            stage,
            attempt,
            blocked_credential: blocked_credential.to_string(),
        });
    }

    fn on_item_terminal(&self, item_id: &str, status: ItemStatus, remark: &str) {
        self.push(SchedulerEvent::ItemTerminal {
            item: item_id.to_string(),
            status,
            remark: remark.to_string(),
        });
    }
}

/// Writes progress to the `tracing` log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn on_item_started(&self, item_id: &str) {
        info!(item = %item_id, "item started");
    }

    fn on_stage_started(&self, item_id: &str, stage: StageName) {
        debug!(item = %item_id, %stage, "{}", stage.label());
    }

    fn on_stage_completed(&self, item_id: &str, stage: StageName) {
        debug!(item = %item_id, %stage, "stage completed");
    }

    fn on_stage_retried(
        &self,
        item_id: &str,
        stage: StageName,
        attempt: u32,
        blocked_credential: &str,
    ) {
        warn!(
            item = %item_id,
            %stage,
            attempt,
            credential = %blocked_credential,
            "credential rejected, retrying with next key"
        );
    }

    fn on_item_terminal(&self, item_id: &str, status: ItemStatus, remark: &str) {
        match status {
            ItemStatus::Failed => warn!(item = %item_id, %status, remark, "item finished"),
            _ => info!(item = %item_id, %status, remark, "item finished"),
        }
    }
}

/// Forwards events over a bounded crossbeam channel.
///
/// Uses `try_send`: when the receiver lags behind, stage events are dropped
/// instead of stalling the worker. Terminal events wait up to
/// [`defaults::TERMINAL_EVENT_TIMEOUT`] for room, since they are the only record
/// of how an item ended.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<SchedulerEvent>,
    terminal_timeout: std::time::Duration,
}

impl ChannelSink {
    pub fn new(tx: Sender<SchedulerEvent>) -> Self {
        Self {
            tx,
            terminal_timeout: defaults::TERMINAL_EVENT_TIMEOUT,
        }
    }

    /// Overrides how long a terminal event may wait for a full channel.
    pub fn with_terminal_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.terminal_timeout = timeout;
        self
    }

    /// Creates a sink and the receiving end of its channel.
    pub fn bounded(capacity: usize) -> (Self, Receiver<SchedulerEvent>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn push(&self, event: SchedulerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event @ SchedulerEvent::ItemTerminal { .. })) => {
                match self.tx.send_timeout(event, self.terminal_timeout) {
                    Ok(()) | Err(SendTimeoutError::Disconnected(_)) => {}
                    Err(SendTimeoutError::Timeout(event)) => {
                        warn!(
                            item = %event.item(),
                            waited = %humantime::format_duration(self.terminal_timeout),
                            "progress channel full, terminal event dropped"
                        );
                    }
                }
            }
            Err(TrySendError::Full(event)) => {
                debug!(item = %event.item(), "progress channel full, event dropped");
            }
            // Receiver gone: nobody is listening anymore
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Records every event in memory.
#[derive(Debug, Default)]
pub struct CollectorSink {
    events: Mutex<Vec<SchedulerEvent>>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all events recorded so far.
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events recorded for one item, in order.
    pub fn events_for(&self, item_id: &str) -> Vec<SchedulerEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.item() == item_id)
            .collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventSink for CollectorSink {
    fn push(&self, event: SchedulerEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Broadcasts to several sinks in order.
#[derive(Default)]
pub struct FanOutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanOutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ProgressSink for FanOutSink {
    fn on_item_started(&self, item_id: &str) {
        for sink in &self.sinks {
            sink.on_item_started(item_id);
        }
    }

    fn on_stage_started(&self, item_id: &str, stage: StageName) {
        for sink in &self.sinks {
            sink.on_stage_started(item_id, stage);
        }
    }

    fn on_stage_completed(&self, item_id: &str, stage: StageName) {
        for sink in &self.sinks {
            sink.on_stage_completed(item_id, stage);
        }
    }

    fn on_stage_retried(
        &self,
        item_id: &str,
        stage: StageName,
        attempt: u32,
        blocked_credential: &str,
    ) {
        for sink in &self.sinks {
            sink.on_stage_retried(item_id, stage, attempt, blocked_credential);
        }
    }

    fn on_item_terminal(&self, item_id: &str, status: ItemStatus, remark: &str) {
        for sink in &self.sinks {
            sink.on_item_terminal(item_id, status, remark);
        }
    }
}

/// Weighted progress of one item through `stages`.
///
/// Stages before `current` count as done; `finished` means every stage is done.
pub fn item_progress_percent(
    stages: &[StageName],
    current: Option<StageName>,
    finished: bool,
) -> u8 {
    if finished {
        return 100;
    }
    let Some(current) = current else {
        return 0;
    };

    let total: u32 = stages.iter().map(StageName::weight).sum();
    if total == 0 {
        return 0;
    }
    let done: u32 = stages
        .iter()
        .take_while(|stage| **stage != current)
        .map(StageName::weight)
        .sum();

    ((done * 100) / total).min(100) as u8
}
