//! A single API credential.

use crate::defaults;
use std::fmt;

/// One interchangeable API key.
///
/// The secret is only reachable through [`Credential::secret`]; `Debug` and
/// `Display` print the name alone so a credential can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    name: String,
    secret: String,
}

impl Credential {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            secret: secret.into(),
        }
    }

    /// Stable identifier of this credential.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Opaque key value, to be handed to the API client and nowhere else.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Short masked form for status listings, e.g. `AIza****`.
    pub fn masked_secret(&self) -> String {
        mask_secret(&self.secret)
    }

    /// Replaces every occurrence of the secret in `text`.
    ///
    /// Stage error messages sometimes echo the request URL or headers; this is
    /// applied before a message reaches item remarks, events or logs.
    pub fn redact(&self, text: &str) -> String {
        if self.secret.is_empty() {
            return text.to_string();
        }
        text.replace(&self.secret, defaults::REDACTED)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("secret", &defaults::REDACTED)
            .finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Masks a secret, keeping at most the first four characters.
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().count();
    if chars <= 8 {
        return "****".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}****")
}
