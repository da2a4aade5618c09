//! Round-robin credential pool with per-key cooldowns.
//!
//! Hands out one credential at a time, starting each scan just after the
//! credential handed out last. Blocked credentials are skipped; when every
//! credential is blocked, [`CredentialPool::acquire`] fails immediately and the
//! caller decides whether to wait, skip the item or abort the batch.

use crate::clock::{Clock, SystemClock};
use crate::credentials::{Credential, CredentialSource};
use crate::error::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound used when `now + cooldown` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Errors returned by [`CredentialPool::acquire`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No credential is usable right now.
    #[error("{}", exhausted_message(.total, .retry_in))]
    Exhausted {
        /// Number of credentials in the pool.
        total: usize,
        /// Time until the earliest block expires, if any credential is blocked.
        retry_in: Option<Duration>,
    },
}

fn exhausted_message(total: &usize, retry_in: &Option<Duration>) -> String {
    match (*total, *retry_in) {
        (0, _) => "credential pool exhausted: no credentials configured".to_string(),
        (n, Some(wait)) => format!(
            "credential pool exhausted: all {n} credential(s) cooling down, next available in {}",
            humantime::format_duration(round_to_secs(wait))
        ),
        (n, None) => format!("credential pool exhausted: all {n} credential(s) blocked"),
    }
}

fn round_to_secs(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs() + u64::from(duration.subsec_nanos() > 0))
}

/// Availability of one credential, as reported by [`CredentialPool::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialState {
    Available,
    Blocked { remaining: Duration },
}

/// Snapshot of one credential; never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub name: String,
    pub state: CredentialState,
    /// Times this credential was handed out by `acquire`.
    pub uses: u64,
}

impl CredentialStatus {
    pub fn is_available(&self) -> bool {
        self.state == CredentialState::Available
    }
}

#[derive(Debug)]
struct Slot {
    credential: Credential,
    blocked_until: Option<Instant>,
    uses: u64,
}

impl Slot {
    fn is_available(&self, now: Instant) -> bool {
        self.blocked_until.is_none_or(|until| until <= now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.blocked_until
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now))
    }
}

#[derive(Debug, Default)]
struct PoolState {
    slots: Vec<Slot>,
    /// Index of the credential handed out last; `None` before first use.
    cursor: Option<usize>,
}

/// Pool of interchangeable, individually rate-limited API credentials.
pub struct CredentialPool {
    state: Mutex<PoolState>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    /// Creates a pool using the system clock.
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self::with_clock(credentials, Arc::new(SystemClock))
    }

    /// Creates a pool with a custom clock (for deterministic testing).
    ///
    /// Credentials with an empty secret are dropped, and when two credentials
    /// share a name only the first is kept.
    pub fn with_clock(credentials: Vec<Credential>, clock: Arc<dyn Clock>) -> Self {
        let mut seen = HashSet::new();
        let mut slots = Vec::with_capacity(credentials.len());

        for credential in credentials {
            if credential.secret().trim().is_empty() {
                warn!(credential = %credential.name(), "skipping credential with empty secret");
                continue;
            }
            if !seen.insert(credential.name().to_string()) {
                warn!(credential = %credential.name(), "skipping duplicate credential name");
                continue;
            }
            slots.push(Slot {
                credential,
                blocked_until: None,
                uses: 0,
            });
        }

        info!(credentials = slots.len(), "credential pool ready");

        Self {
            state: Mutex::new(PoolState {
                slots,
                cursor: None,
            }),
            clock,
        }
    }

    /// Builds a pool from whatever a [`CredentialSource`] lists.
    pub fn from_source(source: &dyn CredentialSource) -> Result<Self> {
        Ok(Self::new(source.list()?))
    }

    /// Builds a pool from a source with a custom clock.
    pub fn from_source_with_clock(
        source: &dyn CredentialSource,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self::with_clock(source.list()?, clock))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the next available credential in round-robin order.
    ///
    /// The scan starts right after the credential handed out last and wraps
    /// once. On failure the pool is left untouched.
    pub fn acquire(&self) -> std::result::Result<Credential, PoolError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let total = state.slots.len();

        if total == 0 {
            return Err(PoolError::Exhausted {
                total: 0,
                retry_in: None,
            });
        }

        let start = state.cursor.map_or(0, |cursor| (cursor + 1) % total);
        for offset in 0..total {
            let index = (start + offset) % total;
            let slot = &mut state.slots[index];
            if !slot.is_available(now) {
                continue;
            }

            slot.blocked_until = None;
            slot.uses += 1;
            let credential = slot.credential.clone();
            state.cursor = Some(index);
            debug!(credential = %credential.name(), "credential acquired");
            return Ok(credential);
        }

        let retry_in = state
            .slots
            .iter()
            .filter_map(|slot| slot.remaining(now))
            .min();
        Err(PoolError::Exhausted { total, retry_in })
    }

    /// Blocks the named credential for `cooldown`.
    ///
    /// An existing block is only ever extended: the deadline becomes the later
    /// of the current one and `now + cooldown`. Unknown names are ignored.
    pub fn block(&self, name: &str, cooldown: Duration) {
        let now = self.clock.now();
        let requested = deadline(now, cooldown);
        let mut state = self.lock();

        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|slot| slot.credential.name() == name)
        else {
            debug!(credential = %name, "block ignored for unknown credential");
            return;
        };

        let until = match slot.blocked_until {
            Some(existing) if existing > requested => existing,
            _ => requested,
        };
        slot.blocked_until = Some(until);

        warn!(
            credential = %name,
            cooldown = %humantime::format_duration(round_to_secs(until.duration_since(now))),
            "credential blocked"
        );
    }

    /// Clears any block on the named credential. Returns true if it was blocked.
    pub fn release(&self, name: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(slot) = state
            .slots
            .iter_mut()
            .find(|slot| slot.credential.name() == name)
        else {
            return false;
        };

        let was_blocked = !slot.is_available(now);
        slot.blocked_until = None;
        if was_blocked {
            info!(credential = %name, "credential released");
        }
        was_blocked
    }

    /// Clears every block.
    pub fn release_all(&self) {
        let mut state = self.lock();
        for slot in state.slots.iter_mut() {
            slot.blocked_until = None;
        }
        info!("all credentials released");
    }

    /// Picks up credentials added to `source` since the pool was built.
    ///
    /// Unseen names are appended to the rotation; a known name whose secret
    /// changed gets the new secret in place. Blocks, usage counts and the
    /// rotation cursor are kept. Credentials missing from `source` stay in the
    /// pool. Returns the number of credentials added.
    pub fn refresh(&self, source: &dyn CredentialSource) -> Result<usize> {
        let listed = source.list()?;
        let mut state = self.lock();
        let mut added = 0;
        let mut updated = 0;

        for credential in listed {
            if credential.secret().trim().is_empty() {
                continue;
            }
            match state
                .slots
                .iter_mut()
                .find(|slot| slot.credential.name() == credential.name())
            {
                Some(slot) => {
                    if slot.credential.secret() != credential.secret() {
                        slot.credential = credential;
                        updated += 1;
                    }
                }
                None => {
                    state.slots.push(Slot {
                        credential,
                        blocked_until: None,
                        uses: 0,
                    });
                    added += 1;
                }
            }
        }

        if added > 0 || updated > 0 {
            info!(added, updated, credentials = state.slots.len(), "credential pool refreshed");
        }
        Ok(added)
    }

    /// Number of credentials in the pool.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of credentials usable right now.
    pub fn available_count(&self) -> usize {
        let now = self.clock.now();
        self.lock()
            .slots
            .iter()
            .filter(|slot| slot.is_available(now))
            .count()
    }

    /// Returns true if the named credential exists and is blocked right now.
    pub fn is_blocked(&self, name: &str) -> bool {
        let now = self.clock.now();
        self.lock()
            .slots
            .iter()
            .any(|slot| slot.credential.name() == name && !slot.is_available(now))
    }

    /// Time until the earliest active block expires.
    pub fn next_unblock_in(&self) -> Option<Duration> {
        let now = self.clock.now();
        self.lock()
            .slots
            .iter()
            .filter_map(|slot| slot.remaining(now))
            .min()
    }

    /// Credential names in pool order.
    pub fn names(&self) -> Vec<String> {
        self.lock()
            .slots
            .iter()
            .map(|slot| slot.credential.name().to_string())
            .collect()
    }

    /// Per-credential availability and usage, in pool order.
    pub fn status(&self) -> Vec<CredentialStatus> {
        let now = self.clock.now();
        self.lock()
            .slots
            .iter()
            .map(|slot| CredentialStatus {
                name: slot.credential.name().to_string(),
                state: match slot.remaining(now) {
                    Some(remaining) => CredentialState::Blocked { remaining },
                    None => CredentialState::Available,
                },
                uses: slot.uses,
            })
            .collect()
    }
}

impl std::fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.names())
            .finish()
    }
}

fn deadline(now: Instant, cooldown: Duration) -> Instant {
    now.checked_add(cooldown)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::credentials::StaticSource;

    fn pool_of(names: &[&str]) -> (CredentialPool, MockClock) {
        let clock = MockClock::new();
        let credentials = names
            .iter()
            .map(|name| Credential::new(*name, format!("secret-{name}-0123456789")))
            .collect();
        (
            CredentialPool::with_clock(credentials, Arc::new(clock.clone())),
            clock,
        )
    }

    fn acquire_name(pool: &CredentialPool) -> String {
        pool.acquire().unwrap().name().to_string()
    }

    #[test]
    fn test_round_robin_order() {
        let (pool, _clock) = pool_of(&["a", "b", "c"]);

        assert_eq!(acquire_name(&pool), "a");
        assert_eq!(acquire_name(&pool), "b");
        assert_eq!(acquire_name(&pool), "c");
        // Should cycle back to first
        assert_eq!(acquire_name(&pool), "a");
    }

    #[test]
    fn test_acquire_skips_blocked() {
        let (pool, _clock) = pool_of(&["a", "b", "c"]);
        pool.block("b", Duration::from_secs(60));

        assert_eq!(acquire_name(&pool), "a");
        assert_eq!(acquire_name(&pool), "c");
        assert_eq!(acquire_name(&pool), "a");
    }

    #[test]
    fn test_all_blocked_is_exhausted() {
        let (pool, _clock) = pool_of(&["a", "b"]);
        pool.block("a", Duration::from_secs(60));
        pool.block("b", Duration::from_secs(120));

        let err = pool.acquire().unwrap_err();
        assert_eq!(
            err,
            PoolError::Exhausted {
                total: 2,
                retry_in: Some(Duration::from_secs(60)),
            }
        );
        assert!(err.to_string().contains("cooling down"));
    }

    #[test]
    fn test_exhausted_leaves_cursor_and_usage_untouched() {
        let (pool, _clock) = pool_of(&["a", "b", "c"]);
        assert_eq!(acquire_name(&pool), "a");

        for name in ["a", "b", "c"] {
            pool.block(name, Duration::from_secs(60));
        }
        assert!(pool.acquire().is_err());

        let uses: Vec<u64> = pool.status().iter().map(|s| s.uses).collect();
        assert_eq!(uses, vec![1, 0, 0]);

        pool.release_all();
        // Scan resumes right after "a", as if the failed call never happened
        assert_eq!(acquire_name(&pool), "b");
    }

    #[test]
    fn test_single_credential_blocked_fails_fast() {
        let (pool, _clock) = pool_of(&["only"]);
        pool.block("only", Duration::from_secs(3600));
        assert!(matches!(
            pool.acquire(),
            Err(PoolError::Exhausted { total: 1, .. })
        ));
    }

    #[test]
    fn test_empty_pool_is_exhausted() {
        let pool = CredentialPool::new(Vec::new());
        assert!(pool.is_empty());
        let err = pool.acquire().unwrap_err();
        assert!(err.to_string().contains("no credentials configured"));
    }

    #[test]
    fn test_cooldown_expires_with_clock() {
        let (pool, clock) = pool_of(&["a"]);
        pool.block("a", Duration::from_secs(300));
        assert!(pool.acquire().is_err());

        clock.advance(Duration::from_secs(299));
        assert!(pool.acquire().is_err());

        clock.advance(Duration::from_secs(1));
        assert_eq!(acquire_name(&pool), "a");
    }

    #[test]
    fn test_block_never_shortens() {
        let (pool, clock) = pool_of(&["a"]);
        pool.block("a", Duration::from_secs(1800));
        pool.block("a", Duration::from_secs(60));

        clock.advance(Duration::from_secs(61));
        assert!(pool.is_blocked("a"));

        clock.advance(Duration::from_secs(1800));
        assert!(!pool.is_blocked("a"));
    }

    #[test]
    fn test_block_extends_when_later() {
        let (pool, clock) = pool_of(&["a"]);
        pool.block("a", Duration::from_secs(60));
        clock.advance(Duration::from_secs(30));
        pool.block("a", Duration::from_secs(60));

        clock.advance(Duration::from_secs(45));
        assert!(pool.is_blocked("a"), "second block should run to t=90s");
    }

    #[test]
    fn test_block_unknown_is_noop() {
        let (pool, _clock) = pool_of(&["a"]);
        pool.block("missing", Duration::from_secs(60));
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn test_release_makes_eligible_on_next_acquire() {
        let (pool, _clock) = pool_of(&["a"]);
        pool.block("a", Duration::from_secs(600));
        assert!(pool.release("a"));
        assert_eq!(acquire_name(&pool), "a");
        assert!(!pool.release("a"), "already released");
        assert!(!pool.release("missing"));
    }

    #[test]
    fn test_huge_cooldown_does_not_panic() {
        let (pool, _clock) = pool_of(&["a"]);
        pool.block("a", Duration::MAX);
        assert!(pool.is_blocked("a"));
    }

    #[test]
    fn test_duplicate_names_and_empty_secrets_dropped() {
        let pool = CredentialPool::new(vec![
            Credential::new("a", "first-secret-value"),
            Credential::new("b", "   "),
            Credential::new("a", "second-secret-value"),
            Credential::new("c", "third-secret-value"),
        ]);
        assert_eq!(pool.names(), vec!["a", "c"]);
        assert_eq!(pool.acquire().unwrap().secret(), "first-secret-value");
    }

    #[test]
    fn test_status_reports_blocks_and_usage() {
        let (pool, _clock) = pool_of(&["a", "b"]);
        pool.acquire().unwrap();
        pool.block("b", Duration::from_secs(90));

        let status = pool.status();
        assert_eq!(status[0].name, "a");
        assert!(status[0].is_available());
        assert_eq!(status[0].uses, 1);
        assert_eq!(
            status[1].state,
            CredentialState::Blocked {
                remaining: Duration::from_secs(90)
            }
        );
        assert_eq!(pool.next_unblock_in(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_debug_does_not_leak_secrets() {
        let (pool, _clock) = pool_of(&["a"]);
        let debug = format!("{pool:?}");
        assert!(debug.contains("\"a\""));
        assert!(!debug.contains("secret-a"));
    }

    #[test]
    fn test_from_source() {
        let source = StaticSource::from_pairs([("x", "xxxxxxxxxx"), ("y", "yyyyyyyyyy")]);
        let pool = CredentialPool::from_source(&source).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_acquire_hands_out_every_key() {
        let (pool, _clock) = pool_of(&["a", "b", "c", "d"]);
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..100).map(|_| acquire_name(&pool)).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut total = 0;
        for handle in handles {
            total += handle.join().unwrap().len();
        }
        assert_eq!(total, 400);
        let uses: u64 = pool.status().iter().map(|s| s.uses).sum();
        assert_eq!(uses, 400);
        // Strict rotation under a single lock spreads load evenly
        assert!(pool.status().iter().all(|s| s.uses == 100));
    }

    #[test]
    fn test_refresh_keeps_blocks_and_appends_new_keys() {
        let (pool, _clock) = pool_of(&["a", "b"]);
        assert_eq!(acquire_name(&pool), "a");
        pool.block("b", Duration::from_secs(600));

        let source = StaticSource::from_pairs([
            ("a", "secret-a-0123456789"),
            ("b", "secret-b-rotated-value"),
            ("c", "secret-c-0123456789"),
        ]);
        assert_eq!(pool.refresh(&source).unwrap(), 1);

        assert_eq!(pool.names(), vec!["a", "b", "c"]);
        assert!(pool.is_blocked("b"));
        assert_eq!(pool.status()[0].uses, 1);

        // Rotation resumes after "a", skips blocked "b" and reaches the new key
        assert_eq!(acquire_name(&pool), "c");
        assert_eq!(acquire_name(&pool), "a");

        pool.release("b");
        assert_eq!(pool.acquire().unwrap().secret(), "secret-b-rotated-value");
    }

    #[test]
    fn test_refresh_ignores_empty_and_unchanged_entries() {
        let (pool, _clock) = pool_of(&["a"]);
        let source = StaticSource::from_pairs([("a", "secret-a-0123456789"), ("blank", " ")]);
        assert_eq!(pool.refresh(&source).unwrap(), 0);
        assert_eq!(pool.len(), 1);
    }
}
