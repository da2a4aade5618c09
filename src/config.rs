use crate::credentials::{CooldownPolicy, Credential, CredentialSource, mask_secret, parse_key_list};
use crate::defaults;
use crate::error::{ReelbatchError, Result};
use crate::pipeline::{StageName, validate_stage_order};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub scheduler: SchedulerConfig,
    pub cooldown: CooldownConfig,
    /// Credential name → secret. The pool rotates through them in name order.
    pub credentials: BTreeMap<String, Secret>,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Stages to run, in pipeline order. Leaving one out skips it for every item.
    pub stages: Vec<String>,
    /// How long each dry-run stage sleeps, e.g. "250ms".
    pub dry_run_stage_delay: String,
}

/// Credential cooldowns, as humantime strings ("30m", "90s") or bare seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CooldownConfig {
    pub quota: String,
    pub rate_limited: String,
    pub unauthorized: String,
}

/// Credential secret that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(defaults::REDACTED)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stages: StageName::ALL
                .iter()
                .map(|stage| stage.as_str().to_string())
                .collect(),
            dry_run_stage_delay: humantime::format_duration(defaults::DRY_RUN_STAGE_DELAY)
                .to_string(),
        }
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            quota: humantime::format_duration(defaults::QUOTA_COOLDOWN).to_string(),
            rate_limited: humantime::format_duration(defaults::RATE_LIMIT_COOLDOWN).to_string(),
            unauthorized: humantime::format_duration(defaults::UNAUTHORIZED_COOLDOWN).to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values; invalid TOML is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => ReelbatchError::ConfigFileNotFound {
                path: path.display().to_string(),
            },
            _ => ReelbatchError::Io(err),
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ReelbatchError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - REELBATCH_QUOTA_COOLDOWN → cooldown.quota
    /// - REELBATCH_RATE_LIMIT_COOLDOWN → cooldown.rate_limited
    /// - REELBATCH_UNAUTHORIZED_COOLDOWN → cooldown.unauthorized
    /// - REELBATCH_API_KEYS → extra credentials (`name=secret,...`), replacing
    ///   file entries with the same name
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var("REELBATCH_QUOTA_COOLDOWN")
            && !value.is_empty()
        {
            self.cooldown.quota = value;
        }

        if let Ok(value) = std::env::var("REELBATCH_RATE_LIMIT_COOLDOWN")
            && !value.is_empty()
        {
            self.cooldown.rate_limited = value;
        }

        if let Ok(value) = std::env::var("REELBATCH_UNAUTHORIZED_COOLDOWN")
            && !value.is_empty()
        {
            self.cooldown.unauthorized = value;
        }

        if let Ok(value) = std::env::var(defaults::API_KEYS_ENV) {
            for credential in parse_key_list(&value) {
                self.credentials.insert(
                    credential.name().to_string(),
                    Secret::new(credential.secret()),
                );
            }
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/reelbatch/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_default()
            .join("reelbatch")
            .join("config.toml")
    }

    /// Parsed and validated cooldowns.
    pub fn cooldown_policy(&self) -> Result<CooldownPolicy> {
        Ok(CooldownPolicy {
            quota: parse_duration("cooldown.quota", &self.cooldown.quota)?,
            rate_limited: parse_duration("cooldown.rate_limited", &self.cooldown.rate_limited)?,
            unauthorized: parse_duration("cooldown.unauthorized", &self.cooldown.unauthorized)?,
        })
    }

    /// Parsed stage list, checked for pipeline order.
    pub fn stage_names(&self) -> Result<Vec<StageName>> {
        let stages = self
            .scheduler
            .stages
            .iter()
            .map(|name| name.parse())
            .collect::<Result<Vec<StageName>>>()?;
        validate_stage_order(&stages)?;
        Ok(stages)
    }

    pub fn dry_run_delay(&self) -> Result<Duration> {
        parse_duration(
            "scheduler.dry_run_stage_delay",
            &self.scheduler.dry_run_stage_delay,
        )
    }

    /// Configured credentials in rotation order.
    pub fn credentials(&self) -> Vec<Credential> {
        self.credentials
            .iter()
            .map(|(name, secret)| Credential::new(name.clone(), secret.expose()))
            .collect()
    }

    /// TOML rendering with every secret masked, for `config show`.
    pub fn to_display_toml(&self) -> Result<String> {
        let mut masked = self.clone();
        for secret in masked.credentials.values_mut() {
            *secret = Secret::new(mask_secret(secret.expose()));
        }
        Ok(toml::to_string_pretty(&masked)?)
    }
}

impl CredentialSource for Config {
    fn list(&self) -> Result<Vec<Credential>> {
        Ok(self.credentials())
    }
}

/// Parses a duration setting: bare numbers are seconds, otherwise humantime.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|err| ReelbatchError::ConfigInvalidValue {
        key: key.to_string(),
        message: format!("'{value}' is not a duration ({err})"),
    })
}
