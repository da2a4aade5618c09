//! Default configuration constants for reelbatch.
//!
//! Shared between the config file layer, the cooldown policy and the CLI so the
//! same numbers are used everywhere.

use std::time::Duration;

/// Cooldown applied to a credential whose quota is exhausted (HTTP 429 / RESOURCE_EXHAUSTED).
pub const QUOTA_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Cooldown applied to a credential that was throttled by a short-term rate limit.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Cooldown applied to a credential rejected as invalid, suspended or unauthorized.
pub const UNAUTHORIZED_COOLDOWN: Duration = Duration::from_secs(30 * 60);

/// Sleep used by dry-run stages in the CLI.
pub const DRY_RUN_STAGE_DELAY: Duration = Duration::from_millis(250);

/// Capacity of the event channel between the scheduler and a channel sink.
///
/// Events are sent with `try_send`; a slow observer loses events rather than
/// stalling the worker. Terminal events are the exception, see
/// [`TERMINAL_EVENT_TIMEOUT`].
pub const EVENT_BUFFER: usize = 256;

/// How long the worker waits for room in a full event channel before giving
/// up on an item's terminal event.
pub const TERMINAL_EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Remark recorded on an item that was interrupted by `stop`.
pub const CANCELLED_REMARK: &str = "cancelled";

/// Remark recorded on a completed item when no stage reported a summary.
pub const COMPLETED_REMARK: &str = "completed";

/// Environment variable holding `name=secret` credential pairs.
pub const API_KEYS_ENV: &str = "REELBATCH_API_KEYS";

/// Prefix used to name credentials supplied without an explicit name.
pub const AUTO_KEY_PREFIX: &str = "api_";

/// Name given to the scheduler's worker thread.
pub const WORKER_THREAD_NAME: &str = "reelbatch-worker";

/// Replacement text for secrets scrubbed out of stage messages.
pub const REDACTED: &str = "[redacted]";
