//! Cooldown policy: how long a credential sits out after a given failure.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Why a stage decided the credential itself was the problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialFailure {
    /// Quota exhausted (HTTP 429, RESOURCE_EXHAUSTED).
    Quota,
    /// Short-term throttling; the key recovers within minutes.
    RateLimited,
    /// Key invalid, suspended or lacking permission (401/403).
    Unauthorized,
}

impl CredentialFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialFailure::Quota => "quota",
            CredentialFailure::RateLimited => "rate_limited",
            CredentialFailure::Unauthorized => "unauthorized",
        }
    }
}

impl fmt::Display for CredentialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block duration per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub quota: Duration,
    pub rate_limited: Duration,
    pub unauthorized: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            quota: defaults::QUOTA_COOLDOWN,
            rate_limited: defaults::RATE_LIMIT_COOLDOWN,
            unauthorized: defaults::UNAUTHORIZED_COOLDOWN,
        }
    }
}

impl CooldownPolicy {
    /// Same cooldown for every failure class.
    pub fn uniform(cooldown: Duration) -> Self {
        Self {
            quota: cooldown,
            rate_limited: cooldown,
            unauthorized: cooldown,
        }
    }

    pub fn cooldown_for(&self, failure: CredentialFailure) -> Duration {
        match failure {
            CredentialFailure::Quota => self.quota,
            CredentialFailure::RateLimited => self.rate_limited,
            CredentialFailure::Unauthorized => self.unauthorized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_defaults() {
        let policy = CooldownPolicy::default();
        assert_eq!(
            policy.cooldown_for(CredentialFailure::Quota),
            defaults::QUOTA_COOLDOWN
        );
        assert_eq!(
            policy.cooldown_for(CredentialFailure::RateLimited),
            defaults::RATE_LIMIT_COOLDOWN
        );
        assert_eq!(
            policy.cooldown_for(CredentialFailure::Unauthorized),
            defaults::UNAUTHORIZED_COOLDOWN
        );
    }

    #[test]
    fn uniform_policy() {
        let policy = CooldownPolicy::uniform(Duration::from_secs(7));
        assert_eq!(
            policy.cooldown_for(CredentialFailure::Unauthorized),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn failure_serializes_snake_case() {
        let json = serde_json::to_string(&CredentialFailure::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
        assert_eq!(CredentialFailure::RateLimited.to_string(), "rate_limited");
    }
}
