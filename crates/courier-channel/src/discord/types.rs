//! Discord gateway and REST payloads.
//!
//! Only the fields the forwarder uses are modelled; everything else in a
//! payload is ignored.

use serde::{Deserialize, Serialize};

use crate::format::SPOILER_PREFIX;
use crate::message::{Attachment, Author, InboundMessage, SlashCommand};

/// Envelope of every gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: i32,
    #[serde(default)]
    pub d: Option<serde_json::Value>,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayHello {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayIdentify {
    pub token: String,
    pub intents: u64,
    pub properties: GatewayProperties,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayReady {
    pub user: DiscordUser,
    pub session_id: String,
    #[serde(default)]
    pub application: Option<PartialApplication>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialApplication {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordAttachment {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub description: Option<String>,
    pub url: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StickerItem {
    pub id: String,
}

/// `MESSAGE_CREATE` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: DiscordUser,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
    #[serde(default)]
    pub sticker_items: Vec<StickerItem>,
}

impl DiscordMessage {
    /// Convert into the platform-neutral model. `self_id` is the bot's own user id.
    pub fn into_inbound(self, self_id: &str) -> InboundMessage {
        let from_self = self.author.id == self_id;
        InboundMessage {
            id: self.id,
            channel_id: self.channel_id,
            guild_id: self.guild_id,
            author: Author {
                name: self.author.global_name.unwrap_or(self.author.username),
                id: self.author.id,
                bot: self.author.bot,
            },
            content: self.content,
            attachments: self
                .attachments
                .into_iter()
                .map(|a| Attachment {
                    spoiler: a.filename.starts_with(SPOILER_PREFIX),
                    id: a.id,
                    filename: a.filename,
                    description: a.description,
                    url: a.url,
                    size: a.size,
                })
                .collect(),
            sticker_ids: self.sticker_items.into_iter().map(|s| s.id).collect(),
            from_self,
        }
    }
}

/// Interaction type for slash commands.
pub const INTERACTION_APPLICATION_COMMAND: u8 = 2;

/// `INTERACTION_CREATE` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct Interaction {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: u8,
    pub token: String,
    #[serde(default)]
    pub data: Option<InteractionData>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub guild_id: Option<String>,
    #[serde(default)]
    pub member: Option<InteractionMember>,
    #[serde(default)]
    pub user: Option<DiscordUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionData {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InteractionMember {
    pub user: DiscordUser,
}

impl Interaction {
    /// The slash command this interaction invokes, if it is one.
    pub fn to_command(&self) -> Option<SlashCommand> {
        if self.kind != INTERACTION_APPLICATION_COMMAND {
            return None;
        }
        let data = self.data.as_ref()?;
        let user_id = self
            .member
            .as_ref()
            .map(|m| m.user.id.clone())
            .or_else(|| self.user.as_ref().map(|u| u.id.clone()));
        Some(SlashCommand {
            name: data.name.clone(),
            channel_id: self.channel_id.clone()?,
            guild_id: self.guild_id.clone(),
            user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_create_converts_to_inbound() {
        let raw = json!({
            "id": "m-1",
            "channel_id": "c-1",
            "author": { "id": "u-1", "username": "ann", "global_name": "Ann B", "bot": false },
            "content": "hello",
            "attachments": [
                { "id": "a-1", "filename": "SPOILER_secret.png", "url": "https://cdn/a", "size": 10 },
                { "id": "a-2", "filename": "notes.txt", "description": "notes", "url": "https://cdn/b" }
            ],
            "sticker_items": [ { "id": "s-1", "name": "wave", "format_type": 1 } ],
            "tts": false
        });
        let message: DiscordMessage = serde_json::from_value(raw).unwrap();
        let inbound = message.into_inbound("bot-id");

        assert!(inbound.is_direct());
        assert!(!inbound.from_self);
        assert_eq!(inbound.author.name, "Ann B");
        assert_eq!(inbound.attachments.len(), 2);
        assert!(inbound.attachments[0].spoiler);
        assert!(!inbound.attachments[1].spoiler);
        assert_eq!(inbound.attachments[1].description.as_deref(), Some("notes"));
        assert_eq!(inbound.sticker_ids, vec!["s-1".to_string()]);
    }

    #[test]
    fn own_message_is_flagged() {
        let raw = json!({
            "id": "m-2",
            "channel_id": "c-1",
            "guild_id": "g-1",
            "author": { "id": "bot-id", "username": "courier", "bot": true }
        });
        let message: DiscordMessage = serde_json::from_value(raw).unwrap();
        let inbound = message.into_inbound("bot-id");
        assert!(inbound.from_self);
        assert!(!inbound.is_direct());
        assert_eq!(inbound.content, "");
    }

    #[test]
    fn interaction_to_command_uses_member_user() {
        let raw = json!({
            "id": "i-1",
            "application_id": "app",
            "type": 2,
            "token": "itok",
            "data": { "id": "cmd", "name": "set_destination", "type": 1 },
            "channel_id": "chan-5",
            "guild_id": "g-1",
            "member": { "user": { "id": "admin-1", "username": "root" } }
        });
        let interaction: Interaction = serde_json::from_value(raw).unwrap();
        let command = interaction.to_command().unwrap();
        assert_eq!(command.name, "set_destination");
        assert_eq!(command.channel_id, "chan-5");
        assert_eq!(command.user_id.as_deref(), Some("admin-1"));
    }

    #[test]
    fn ping_interaction_is_not_a_command() {
        let raw = json!({ "id": "i-2", "type": 1, "token": "t" });
        let interaction: Interaction = serde_json::from_value(raw).unwrap();
        assert!(interaction.to_command().is_none());
    }
}
