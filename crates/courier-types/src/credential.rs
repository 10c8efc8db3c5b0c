//! The secret the supervised connection authenticates with.
//!
//! A [`Credential`] never prints its value: `Debug` is redacted and there is
//! no `Display` impl, so it cannot end up in a `tracing` field by accident.
//! Only [`Credential::expose`] hands out the raw string, for the adapter that
//! puts it on the wire and for the state file.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CourierError;

/// Opaque secret string identifying the account to connect as.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credential(String);

impl Credential {
    /// Parse a credential supplied by a caller.
    ///
    /// Surrounding whitespace is trimmed. Empty values and values containing
    /// inner whitespace or control characters are rejected.
    pub fn parse(raw: &str) -> Result<Self, CourierError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(CourierError::InvalidCredential("credential is empty".into()));
        }
        if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CourierError::InvalidCredential(
                "credential contains whitespace or control characters".into(),
            ));
        }
        Ok(Self(token.to_string()))
    }

    /// The raw secret.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Credential {
    type Error = CourierError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Credential> for String {
    fn from(credential: Credential) -> Self {
        credential.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
