//! Scriptable stage for tests.

use crate::pipeline::stage::{Stage, StageContext, StageName, StageOutcome};
use crossbeam_channel::{Receiver, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// One recorded invocation of a [`MockStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub item_id: String,
    pub attempt: u32,
    /// Name of the credential handed to the stage, if any.
    pub credential: Option<String>,
}

/// Stage whose outcomes are scripted up front.
///
/// Outcome precedence per call: a per-item outcome set with [`MockStage::on_item`],
/// then the next queued outcome from [`MockStage::then`], then the fallback.
pub struct MockStage {
    name: StageName,
    requires_credential: Option<bool>,
    fallback: StageOutcome,
    script: Mutex<VecDeque<StageOutcome>>,
    per_item: HashMap<String, StageOutcome>,
    delay: Duration,
    panic_message: Option<String>,
    gate: Option<Receiver<()>>,
    started_tx: Option<Sender<String>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockStage {
    /// Creates a mock that always succeeds.
    pub fn new(name: StageName) -> Self {
        Self {
            name,
            requires_credential: None,
            fallback: StageOutcome::success(),
            script: Mutex::new(VecDeque::new()),
            per_item: HashMap::new(),
            delay: Duration::ZERO,
            panic_message: None,
            gate: None,
            started_tx: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Outcome returned once the script is used up.
    pub fn with_outcome(mut self, outcome: StageOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Queues an outcome for the next unscripted call.
    pub fn then(self, outcome: StageOutcome) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(outcome);
        self
    }

    /// Fixed outcome for one item, regardless of the script.
    pub fn on_item(mut self, item_id: &str, outcome: StageOutcome) -> Self {
        self.per_item.insert(item_id.to_string(), outcome);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes every call panic with `message`.
    pub fn panicking(mut self, message: &str) -> Self {
        self.panic_message = Some(message.to_string());
        self
    }

    /// Overrides the default taken from [`StageName::uses_api_key`].
    pub fn with_credential_required(mut self, required: bool) -> Self {
        self.requires_credential = Some(required);
        self
    }

    /// Each call blocks until one `()` arrives (or the sender is dropped).
    pub fn with_gate(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Sends the item id when a call begins.
    pub fn with_started_signal(mut self, tx: Sender<String>) -> Self {
        self.started_tx = Some(tx);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_outcome(&self, item_id: &str) -> StageOutcome {
        if let Some(outcome) = self.per_item.get(item_id) {
            return outcome.clone();
        }
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Stage for MockStage {
    fn name(&self) -> StageName {
        self.name
    }

    fn requires_credential(&self) -> bool {
        self.requires_credential
            .unwrap_or_else(|| self.name.uses_api_key())
    }

    fn run(&self, ctx: &StageContext<'_>) -> StageOutcome {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                item_id: ctx.item_id.to_string(),
                attempt: ctx.attempt,
                credential: ctx.credential.map(|c| c.name().to_string()),
            });

        if let Some(tx) = &self.started_tx {
            // Test may have stopped listening
            tx.send(ctx.item_id.to_string()).ok();
        }
        if let Some(gate) = &self.gate {
            // Disconnected gate releases the call
            gate.recv().ok();
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if let Some(message) = &self.panic_message {
            panic!("{message}");
        }

        self.next_outcome(ctx.item_id)
    }
}
