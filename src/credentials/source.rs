//! Where credentials come from at pool construction time.
//!
//! Storage and encryption of keys belong to the host application; the pool only
//! needs a list. Two in-crate sources exist: a static list and the
//! `REELBATCH_API_KEYS` environment variable. The config file is a third one
//! (see [`Config`](crate::config::Config)).

use crate::credentials::Credential;
use crate::defaults;
use crate::error::Result;

/// Anything that can list credentials once, when the pool is built.
pub trait CredentialSource {
    fn list(&self) -> Result<Vec<Credential>>;
}

/// Fixed in-memory list of credentials.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    credentials: Vec<Credential>,
}

impl StaticSource {
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self { credentials }
    }

    /// Builds a source from `(name, secret)` pairs.
    pub fn from_pairs<I, N, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            credentials: pairs
                .into_iter()
                .map(|(name, secret)| Credential::new(name, secret))
                .collect(),
        }
    }
}

impl CredentialSource for StaticSource {
    fn list(&self) -> Result<Vec<Credential>> {
        Ok(self.credentials.clone())
    }
}

/// Reads `name=secret` pairs from an environment variable.
#[derive(Debug, Clone)]
pub struct EnvSource {
    var: String,
}

impl EnvSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new(defaults::API_KEYS_ENV)
    }
}

impl CredentialSource for EnvSource {
    fn list(&self) -> Result<Vec<Credential>> {
        match std::env::var(&self.var) {
            Ok(value) => Ok(parse_key_list(&value)),
            Err(_) => Ok(Vec::new()),
        }
    }
}

/// Parses a comma- or newline-separated list of credentials.
///
/// Each entry is either `name=secret` or a bare secret; bare secrets are named
/// `api_<n>` by their 1-based position in the list. Blank entries are ignored.
pub fn parse_key_list(input: &str) -> Vec<Credential> {
    input
        .split([',', '\n'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(index, entry)| match entry.split_once('=') {
            Some((name, secret)) if !name.trim().is_empty() => {
                Credential::new(name.trim(), secret.trim())
            }
            Some((_, secret)) => Credential::new(auto_name(index), secret.trim()),
            None => Credential::new(auto_name(index), entry),
        })
        .collect()
}

fn auto_name(index: usize) -> String {
    format!("{}{}", defaults::AUTO_KEY_PREFIX, index + 1)
}
