//! Batch scheduler: a FIFO queue of URLs driven by one worker thread.
//!
//! Callers (GUI, CLI) only enqueue, remove and observe. The worker claims the
//! head waiting item, runs every stage in order, and rotates credentials from
//! the shared [`CredentialPool`] when a stage reports a credential error.
//!
//! Locking: the queue and the run state have separate mutexes. When both are
//! needed the queue lock is taken first. Progress sinks are never called with
//! either lock held.

mod worker;

use crate::credentials::{CooldownPolicy, CredentialPool};
use crate::defaults;
use crate::error::{ReelbatchError, Result};
use crate::pipeline::{
    CancelToken, ProgressSink, Stage, StageName, item_progress_percent, validate_stage_order,
};
use crate::queue::{self, IntakeReport, ItemStatus, QueueCounts, QueueItem, QueueStore};
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub(crate) struct QueueState {
    pub(crate) store: QueueStore,
    /// Item the worker has claimed and not yet fully reported.
    pub(crate) active: Option<String>,
}

#[derive(Default)]
struct RunState {
    running: bool,
    worker: Option<JoinHandle<()>>,
    worker_thread: Option<ThreadId>,
}

pub(crate) struct Shared {
    queue: Mutex<QueueState>,
    queue_changed: Condvar,
    run: Mutex<RunState>,
    run_changed: Condvar,
    pub(crate) cancel: CancelToken,
    wake_tx: Sender<()>,
    pub(crate) wake_rx: Receiver<()>,
    pub(crate) pool: Arc<CredentialPool>,
    pub(crate) stages: Vec<Arc<dyn Stage>>,
    pub(crate) sink: Arc<dyn ProgressSink>,
    policy: Mutex<CooldownPolicy>,
}

impl Shared {
    pub(crate) fn lock_queue(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wakes an idle worker. Wake-ups coalesce in a one-slot channel.
    pub(crate) fn wake(&self) {
        self.wake_tx.try_send(()).ok();
    }

    pub(crate) fn notify_queue(&self) {
        self.queue_changed.notify_all();
    }

    pub(crate) fn policy(&self) -> CooldownPolicy {
        *self.policy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Called by the worker as its last action.
    pub(crate) fn mark_stopped(&self) {
        {
            let mut run = self.lock_run();
            run.running = false;
            run.worker_thread = None;
        }
        self.run_changed.notify_all();
        // Taking the queue lock orders this notification after any waiter's check
        let _queue = self.lock_queue();
        self.queue_changed.notify_all();
    }
}

/// Drives queued URLs through the pipeline on a single worker thread.
///
/// Dropping the scheduler stops the worker.
pub struct BatchScheduler {
    shared: Arc<Shared>,
}

impl BatchScheduler {
    /// Creates a stopped scheduler.
    ///
    /// Fails if the stages are not in pipeline order or a stage appears twice.
    pub fn new(
        pool: Arc<CredentialPool>,
        stages: Vec<Arc<dyn Stage>>,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<Self> {
        let names: Vec<StageName> = stages.iter().map(|stage| stage.name()).collect();
        validate_stage_order(&names)?;

        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState {
                    store: QueueStore::new(),
                    active: None,
                }),
                queue_changed: Condvar::new(),
                run: Mutex::new(RunState::default()),
                run_changed: Condvar::new(),
                cancel: CancelToken::new(),
                wake_tx,
                wake_rx,
                pool,
                stages,
                sink,
                policy: Mutex::new(CooldownPolicy::default()),
            }),
        })
    }

    /// Sets how long a rejected credential is blocked.
    pub fn with_cooldown_policy(self, policy: CooldownPolicy) -> Self {
        self.set_cooldown_policy(policy);
        self
    }

    /// Changes the cooldown policy; takes effect at the next credential error.
    pub fn set_cooldown_policy(&self, policy: CooldownPolicy) {
        *self
            .shared
            .policy
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = policy;
    }

    pub fn cooldown_policy(&self) -> CooldownPolicy {
        self.shared.policy()
    }

    /// Spawns the worker thread.
    pub fn start(&self) -> Result<()> {
        let mut run = self.shared.lock_run();
        if run.running {
            return Err(ReelbatchError::AlreadyRunning);
        }
        if let Some(previous) = run.worker.take() {
            join_worker(previous);
        }

        self.shared.cancel.reset();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(defaults::WORKER_THREAD_NAME.to_string())
            .spawn(move || worker::run(shared))
            .map_err(ReelbatchError::WorkerSpawn)?;

        run.running = true;
        run.worker_thread = Some(handle.thread().id());
        run.worker = Some(handle);
        info!(stages = self.shared.stages.len(), "batch scheduler started");
        Ok(())
    }

    /// Asks the worker to stop without waiting for it.
    ///
    /// The current stage call runs to completion; the item is then marked
    /// skipped and no further items start.
    pub fn request_stop(&self) {
        self.shared.cancel.cancel();
        self.shared.wake();
        // Wake `wait_idle` callers so they can observe the stop
        let _queue = self.shared.lock_queue();
        self.shared.notify_queue();
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// A no-op when not running. Called from the worker thread itself (e.g. from
    /// a progress sink), it only requests the stop.
    pub fn stop(&self) {
        let handle = {
            let mut run = self.shared.lock_run();
            if run.worker_thread == Some(thread::current().id()) {
                drop(run);
                self.request_stop();
                return;
            }
            if !run.running {
                run.worker.take()
            } else {
                drop(run);
                self.request_stop();
                run = self.shared.lock_run();
                match run.worker.take() {
                    Some(handle) => Some(handle),
                    // Another caller is already joining; wait for it to finish
                    None => {
                        while run.running {
                            run = self
                                .shared
                                .run_changed
                                .wait(run)
                                .unwrap_or_else(PoisonError::into_inner);
                        }
                        return;
                    }
                }
            }
        };

        if let Some(handle) = handle {
            join_worker(handle);
            // The worker marks itself stopped; this covers a worker that panicked
            self.shared.mark_stopped();
            info!("batch scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_run().running
    }

    /// Blocks until no item is waiting or processing.
    ///
    /// Returns false if `timeout` elapses first, or if the scheduler stops (or
    /// was never started) while work remains.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut queue = self.shared.lock_queue();
        loop {
            if !queue.store.has_pending() && queue.active.is_none() {
                return true;
            }
            if self.shared.cancel.is_cancelled() || !self.is_running() {
                return false;
            }
            queue = match deadline {
                None => self
                    .shared
                    .queue_changed
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.shared
                        .queue_changed
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Adds a URL to the back of the queue. Returns false for blank or tracked URLs.
    pub fn enqueue(&self, url: &str) -> bool {
        let added = self.shared.lock_queue().store.enqueue(url);
        if added {
            debug!(item = %url.trim(), "item enqueued");
            self.shared.wake();
            self.shared.notify_queue();
        }
        added
    }

    /// Enqueues every URL found in pasted text.
    pub fn enqueue_text(&self, text: &str) -> IntakeReport {
        let report = queue::enqueue_text(&mut self.shared.lock_queue().store, text);
        if report.added > 0 {
            info!(
                added = report.added,
                duplicates = report.duplicates,
                "urls enqueued"
            );
            self.shared.wake();
            self.shared.notify_queue();
        }
        report
    }

    /// Removes a URL that has not started yet.
    pub fn remove_waiting(&self, url: &str) -> bool {
        let removed = self.shared.lock_queue().store.remove_waiting(url);
        if removed {
            self.shared.notify_queue();
        }
        removed
    }

    /// Removes every waiting URL. The processing item is untouched.
    pub fn clear_waiting(&self) -> usize {
        let removed = self.shared.lock_queue().store.clear_waiting();
        if removed > 0 {
            self.shared.notify_queue();
        }
        removed
    }

    /// Removes every finished item.
    pub fn clear_finished(&self) -> usize {
        self.shared.lock_queue().store.clear_finished()
    }

    /// Forgets a finished item so its URL can be queued again.
    pub fn purge(&self, url: &str) -> bool {
        self.shared.lock_queue().store.purge(url)
    }

    /// Copies of all items in queue order.
    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.shared.lock_queue().store.snapshot()
    }

    pub fn item(&self, url: &str) -> Option<QueueItem> {
        self.shared.lock_queue().store.get(url).cloned()
    }

    pub fn counts(&self) -> QueueCounts {
        self.shared.lock_queue().store.counts()
    }

    /// Weighted progress of one item, 0–100.
    pub fn item_progress(&self, url: &str) -> Option<u8> {
        let item = self.item(url)?;
        Some(item_progress_percent(
            &self.stage_names(),
            item.current_stage(),
            item.status() == ItemStatus::Completed,
        ))
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.shared.pool
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.shared.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl Drop for BatchScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for BatchScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchScheduler")
            .field("stages", &self.stage_names())
            .field("running", &self.is_running())
            .field("counts", &self.counts())
            .finish()
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if let Err(panic_info) = handle.join() {
        warn!(
            "batch worker panicked: {}",
            worker::panic_message(panic_info.as_ref())
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use crate::pipeline::{CollectorSink, MockStage, StageOutcome};

    fn pool(n: usize) -> Arc<CredentialPool> {
        Arc::new(CredentialPool::new(
            (1..=n)
                .map(|i| Credential::new(format!("api_{i}"), format!("secret-{i}-abcdef")))
                .collect(),
        ))
    }

    fn scheduler(stages: Vec<Arc<dyn Stage>>) -> (BatchScheduler, Arc<CollectorSink>) {
        let sink = Arc::new(CollectorSink::new());
        let scheduler = BatchScheduler::new(pool(2), stages, sink.clone()).unwrap();
        (scheduler, sink)
    }

    fn wait(scheduler: &BatchScheduler) {
        assert!(scheduler.wait_idle(Some(Duration::from_secs(10))));
    }

    #[test]
    fn test_rejects_out_of_order_stages() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(MockStage::new(StageName::Tts)),
            Arc::new(MockStage::new(StageName::Download)),
        ];
        let err = BatchScheduler::new(pool(1), stages, Arc::new(CollectorSink::new()))
            .unwrap_err();
        assert!(matches!(err, ReelbatchError::StageOrder { .. }));
    }

    #[test]
    fn test_start_twice_fails() {
        let (scheduler, _sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        scheduler.start().unwrap();
        assert!(matches!(
            scheduler.start(),
            Err(ReelbatchError::AlreadyRunning)
        ));
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_stop_when_not_running_is_noop() {
        let (scheduler, _sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let (scheduler, _sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        scheduler.start().unwrap();
        scheduler.stop();

        scheduler.start().unwrap();
        scheduler.enqueue("https://example.com/a");
        wait(&scheduler);
        assert_eq!(
            scheduler.item("https://example.com/a").unwrap().status(),
            ItemStatus::Completed
        );
    }

    #[test]
    fn test_items_enqueued_before_start_are_processed() {
        let (scheduler, sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        assert!(scheduler.enqueue("a"));
        assert!(scheduler.enqueue("b"));
        scheduler.start().unwrap();
        wait(&scheduler);

        assert_eq!(scheduler.counts().completed, 2);
        assert_eq!(sink.events_for("b").len(), 4);
    }

    #[test]
    fn test_wait_idle_false_when_not_running() {
        let (scheduler, _sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        scheduler.enqueue("a");
        assert!(!scheduler.wait_idle(Some(Duration::from_millis(50))));
    }

    #[test]
    fn test_item_progress() {
        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(MockStage::new(StageName::Download)),
            Arc::new(MockStage::new(StageName::Finalize)),
        ];
        let (scheduler, _sink) = scheduler(stages);
        scheduler.enqueue("a");
        assert_eq!(scheduler.item_progress("a"), Some(0));
        scheduler.start().unwrap();
        wait(&scheduler);
        assert_eq!(scheduler.item_progress("a"), Some(100));
        assert_eq!(scheduler.item_progress("missing"), None);
    }

    #[test]
    fn test_cooldown_policy_is_applied() {
        let stage = MockStage::new(StageName::Tts).with_outcome(StageOutcome::credential_error(
            crate::credentials::CredentialFailure::RateLimited,
            "slow down",
        ));
        let (scheduler, _sink) = scheduler(vec![Arc::new(stage)]);
        let scheduler =
            scheduler.with_cooldown_policy(CooldownPolicy::uniform(Duration::from_secs(3600)));
        scheduler.enqueue("a");
        scheduler.start().unwrap();
        wait(&scheduler);

        let remaining = scheduler.pool().next_unblock_in().unwrap();
        assert!(remaining > Duration::from_secs(3000));
    }

    #[test]
    fn test_clear_and_purge() {
        let (scheduler, _sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        scheduler.enqueue("a");
        scheduler.start().unwrap();
        wait(&scheduler);
        scheduler.stop();

        scheduler.enqueue("b");
        scheduler.enqueue("c");
        assert!(!scheduler.enqueue("a"));
        assert!(scheduler.remove_waiting("c"));
        assert_eq!(scheduler.clear_waiting(), 1);
        assert!(scheduler.purge("a"));
        assert!(scheduler.enqueue("a"));
        assert_eq!(scheduler.clear_finished(), 0);
        assert_eq!(scheduler.snapshot().len(), 1);
    }

    #[test]
    fn test_debug_output() {
        let (scheduler, _sink) = scheduler(vec![Arc::new(MockStage::new(StageName::Download))]);
        let debug = format!("{scheduler:?}");
        assert!(debug.contains("Download"));
        assert!(debug.contains("running: false"));
    }
}
