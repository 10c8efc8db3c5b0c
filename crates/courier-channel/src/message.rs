//! Inbound message model and outbound payloads.

use std::sync::Arc;

use crate::channel::MessageActions;

/// Identity of a message author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub bot: bool,
}

impl Author {
    /// Platform mention syntax for this author.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub description: Option<String>,
    pub spoiler: bool,
    /// Where the bytes can be fetched from.
    pub url: String,
    pub size: u64,
}

/// A message received from the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: String,
    pub channel_id: String,
    /// `None` for direct messages.
    pub guild_id: Option<String>,
    pub author: Author,
    pub content: String,
    /// Attachments in the order the author sent them.
    pub attachments: Vec<Attachment>,
    pub sticker_ids: Vec<String>,
    /// Whether the message was sent by the connected account itself.
    pub from_self: bool,
}

impl InboundMessage {
    pub fn is_direct(&self) -> bool {
        self.guild_id.is_none()
    }
}

/// An inbound message together with the affordances to act on it.
#[derive(Clone)]
pub struct InboundEvent {
    pub message: InboundMessage,
    pub actions: Arc<dyn MessageActions>,
}

impl std::fmt::Debug for InboundEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundEvent")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// A file to upload with an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFile {
    pub filename: String,
    pub description: Option<String>,
    pub spoiler: bool,
    pub data: Vec<u8>,
}

/// A message to send to a destination channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub files: Vec<OutboundFile>,
    pub sticker_ids: Vec<String>,
    /// Render mentions as text without pinging anyone.
    pub suppress_mentions: bool,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// A slash command to register with the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: String,
    pub description: String,
    /// Only administrators may invoke it.
    pub admin_only: bool,
    /// Not available in direct messages.
    pub guild_only: bool,
}

/// A slash command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: String,
    pub channel_id: String,
    pub guild_id: Option<String>,
    pub user_id: Option<String>,
}
