//! The worker loop: claim an item, run its stages, report, repeat.

use super::Shared;
use crate::credentials::Credential;
use crate::defaults;
use crate::pipeline::{ProgressSink, Stage, StageContext, StageName, StageOutcome};
use crate::queue::ItemStatus;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How one stage ended for the item, after retries.
enum StageResult {
    Done(Option<String>),
    Failed(String),
    Skipped(String),
    Cancelled,
}

pub(super) fn run(shared: Arc<Shared>) {
    debug!("batch worker started");

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| work_loop(&shared))) {
        let message = panic_message(payload.as_ref());
        error!("batch worker aborted: {message}");
        abandon_active(&shared, &format!("worker aborted: {message}"));
    }

    shared.mark_stopped();
    debug!("batch worker exited");
}

fn work_loop(shared: &Shared) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let claimed = {
            let mut queue = shared.lock_queue();
            let claimed = queue.store.claim_next();
            queue.active.clone_from(&claimed);
            claimed
        };

        match claimed {
            Some(item_id) => {
                shared.notify_queue();
                drive_item(shared, &item_id);
                shared.lock_queue().active = None;
                shared.notify_queue();
            }
            None => {
                // Shared holds the sender, so this only returns on a wake-up
                if shared.wake_rx.recv().is_err() {
                    break;
                }
            }
        }
    }
}

fn drive_item(shared: &Shared, item_id: &str) {
    info!(item = %item_id, "processing item");
    notify(shared, |sink| sink.on_item_started(item_id));

    let mut summary = None;
    for stage in &shared.stages {
        let name = stage.name();
        if shared.cancel.is_cancelled() {
            finish(shared, item_id, ItemStatus::Skipped, defaults::CANCELLED_REMARK);
            return;
        }

        set_stage(shared, item_id, name, name.label().to_string());
        notify(shared, |sink| sink.on_stage_started(item_id, name));

        match run_stage(shared, item_id, stage.as_ref()) {
            StageResult::Done(stage_summary) => {
                if stage_summary.is_some() {
                    summary = stage_summary;
                }
                notify(shared, |sink| sink.on_stage_completed(item_id, name));
            }
            StageResult::Failed(message) => {
                finish(shared, item_id, ItemStatus::Failed, &format!("{name}: {message}"));
                return;
            }
            StageResult::Skipped(reason) => {
                finish(shared, item_id, ItemStatus::Skipped, &format!("{name}: {reason}"));
                return;
            }
            StageResult::Cancelled => {
                finish(shared, item_id, ItemStatus::Skipped, defaults::CANCELLED_REMARK);
                return;
            }
        }
    }

    let remark = summary.unwrap_or_else(|| defaults::COMPLETED_REMARK.to_string());
    finish(shared, item_id, ItemStatus::Completed, &remark);
}

/// Runs one stage, rotating credentials on credential errors.
///
/// A keyed stage gets at most one attempt per credential in the pool.
fn run_stage(shared: &Shared, item_id: &str, stage: &dyn Stage) -> StageResult {
    let name = stage.name();

    if !stage.requires_credential() {
        record_attempt(shared, item_id);
        return match invoke(shared, stage, item_id, 1, None) {
            StageOutcome::Success { summary } => StageResult::Done(summary),
            StageOutcome::CredentialError { message, .. } | StageOutcome::Fatal(message) => {
                StageResult::Failed(message)
            }
            StageOutcome::SoftSkip(reason) => StageResult::Skipped(reason),
        };
    }

    let budget = u32::try_from(shared.pool.len()).unwrap_or(u32::MAX);
    let mut attempt = 1;
    loop {
        let credential = match shared.pool.acquire() {
            Ok(credential) => credential,
            Err(err) => {
                warn!(item = %item_id, stage = %name, "{err}");
                return StageResult::Failed(format!("no credential available ({err})"));
            }
        };

        record_attempt(shared, item_id);
        let outcome = invoke(shared, stage, item_id, attempt, Some(&credential));

        let (kind, message) = match outcome {
            StageOutcome::Success { summary } => {
                return StageResult::Done(summary.map(|s| credential.redact(&s)));
            }
            StageOutcome::Fatal(message) => return StageResult::Failed(credential.redact(&message)),
            StageOutcome::SoftSkip(reason) => {
                return StageResult::Skipped(credential.redact(&reason));
            }
            StageOutcome::CredentialError { kind, message } => (kind, credential.redact(&message)),
        };

        let cooldown = shared.policy().cooldown_for(kind);
        shared.pool.block(credential.name(), cooldown);
        warn!(
            item = %item_id,
            stage = %name,
            credential = %credential.name(),
            %kind,
            attempt,
            "credential rejected: {message}"
        );

        if attempt >= budget {
            return StageResult::Failed(format!(
                "{kind} error on every credential after {attempt} attempt(s): {message}"
            ));
        }
        if shared.cancel.is_cancelled() {
            return StageResult::Cancelled;
        }

        attempt += 1;
        set_stage(
            shared,
            item_id,
            name,
            format!("{} (retry {attempt} of {budget})", name.label()),
        );
        notify(shared, |sink| {
            sink.on_stage_retried(item_id, name, attempt, credential.name());
        });
    }
}

/// Calls the stage, turning a panic into a fatal outcome.
fn invoke(
    shared: &Shared,
    stage: &dyn Stage,
    item_id: &str,
    attempt: u32,
    credential: Option<&Credential>,
) -> StageOutcome {
    let ctx = StageContext {
        item_id,
        attempt,
        credential,
        cancel: &shared.cancel,
    };

    match panic::catch_unwind(AssertUnwindSafe(|| stage.run(&ctx))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(item = %item_id, stage = %stage.name(), "stage panicked: {message}");
            let message = format!("stage panicked: {message}");
            StageOutcome::Fatal(match credential {
                Some(credential) => credential.redact(&message),
                None => message,
            })
        }
    }
}

fn set_stage(shared: &Shared, item_id: &str, stage: StageName, message: String) {
    let mut queue = shared.lock_queue();
    if let Some(item) = queue.store.get_mut(item_id)
        && let Err(err) = item.set_stage(stage, message)
    {
        warn!(item = %item_id, "{err}");
    }
}

fn record_attempt(shared: &Shared, item_id: &str) {
    if let Some(item) = shared.lock_queue().store.get_mut(item_id) {
        item.record_attempt();
    }
}

/// Moves the item to a terminal state, then reports it.
fn finish(shared: &Shared, item_id: &str, status: ItemStatus, remark: &str) {
    {
        let mut queue = shared.lock_queue();
        let applied = match queue.store.get_mut(item_id) {
            Some(item) => match status {
                ItemStatus::Completed => item.succeed(remark),
                ItemStatus::Failed => item.fail(remark),
                ItemStatus::Skipped => item.skip(remark),
                ItemStatus::Waiting | ItemStatus::Processing => Ok(()),
            },
            None => Ok(()),
        };
        if let Err(err) = applied {
            warn!(item = %item_id, "{err}");
        }
    }

    notify(shared, |sink| sink.on_item_terminal(item_id, status, remark));
}

/// Calls the progress sink; a panicking sink is logged and otherwise ignored.
fn notify(shared: &Shared, call: impl FnOnce(&dyn ProgressSink)) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| call(shared.sink.as_ref()))) {
        error!("progress sink panicked: {}", panic_message(payload.as_ref()));
    }
}

/// Fails the item the worker was driving when it aborted, so the queue can move on.
fn abandon_active(shared: &Shared, remark: &str) {
    let abandoned = {
        let mut queue = shared.lock_queue();
        let Some(item_id) = queue.active.take() else {
            return;
        };
        if let Some(item) = queue.store.get_mut(&item_id)
            && !item.is_terminal()
            && let Err(err) = item.fail(remark)
        {
            warn!(item = %item_id, "{err}");
        }
        item_id
    };
    warn!(item = %abandoned, "{remark}");
    shared.notify_queue();
}

/// Extracts a readable message from a panic payload.
pub(super) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}
