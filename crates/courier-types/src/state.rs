//! The record persisted between process runs.

use serde::{Deserialize, Deserializer, Serialize};

use crate::credential::Credential;

/// State restored at process start and saved after Start/Stop and
/// destination changes.
///
/// Unknown fields are ignored and every field defaults, so an older or
/// partial file still loads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Credential of the last successful `Start`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<Credential>,
    /// Forwarding destination (a platform channel id).
    #[serde(
        default,
        alias = "channel_id",
        deserialize_with = "deserialize_snowflake",
        skip_serializing_if = "Option::is_none"
    )]
    pub destination: Option<String>,
    /// Set by an operator `Stop`, cleared by the next `Start`.
    #[serde(default)]
    pub manually_stopped: bool,
}

/// Channel ids were historically written as JSON numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Snowflake {
    Text(String),
    Number(u64),
}

fn deserialize_snowflake<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Snowflake>::deserialize(deserializer)?;
    Ok(raw.map(|id| match id {
        Snowflake::Text(text) => text,
        Snowflake::Number(n) => n.to_string(),
    }))
}
