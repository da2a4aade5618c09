//! reelbatch - Batch production scheduler for video localization
//!
//! Runs queued video URLs through an ordered stage pipeline on a single
//! background worker, rotating API credentials when a provider rejects one.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod defaults;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod queue;
pub mod scheduler;

// Credential rotation
pub use credentials::{
    CooldownPolicy, Credential, CredentialFailure, CredentialPool, CredentialSource, PoolError,
};

// Stages and progress reporting
pub use pipeline::{ProgressSink, SchedulerEvent, Stage, StageContext, StageName, StageOutcome};

// Queue
pub use queue::{ItemStatus, QueueCounts, QueueItem};

// Scheduler
pub use scheduler::BatchScheduler;

// Error handling
pub use error::{ReelbatchError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            let hash_part = ver.split('+').nth(1).unwrap_or("");
            assert_eq!(hash_part.len(), 7, "Git hash should be 7 chars, got: {}", hash_part);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
