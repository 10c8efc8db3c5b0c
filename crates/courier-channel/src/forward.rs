//! Direct-message forwarding.
//!
//! Every direct message a user sends to the bot is re-posted to the
//! configured destination channel with its attachments and stickers, and the
//! original gets a check-mark reaction. Administrators pick the destination
//! with the `set_destination` slash command.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::channel::{ChannelError, MessageHandler};
use crate::format;
use crate::message::{CommandSpec, InboundEvent, OutboundFile, OutboundMessage, SlashCommand};

/// Name of the command that sets the forwarding destination.
pub const SET_DESTINATION_COMMAND: &str = "set_destination";

/// Where the forwarding destination is read from and stored to.
pub trait DestinationStore: Send + Sync {
    fn destination(&self) -> Option<String>;

    /// Store a new destination. Persistence is best-effort.
    fn set_destination(&self, destination: String);
}

/// What happened to an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Delivered,
    /// No usable destination; the author was told.
    NotConfigured,
    /// Sent by the bot itself.
    SkippedOwn,
    /// Posted in a server channel rather than a direct message.
    SkippedGuild,
}

/// Message handler that forwards direct messages to the destination.
pub struct Forwarder {
    destinations: Arc<dyn DestinationStore>,
}

impl Forwarder {
    pub fn new(destinations: Arc<dyn DestinationStore>) -> Self {
        Self { destinations }
    }

    /// Forward one inbound message.
    pub async fn forward(&self, event: &InboundEvent) -> Result<ForwardOutcome, ChannelError> {
        let message = &event.message;
        if message.from_self {
            return Ok(ForwardOutcome::SkippedOwn);
        }
        if !message.is_direct() {
            return Ok(ForwardOutcome::SkippedGuild);
        }

        info!(author = %message.author.name, attachments = message.attachments.len(), "forwarding message");

        let Some(destination) = self.destinations.destination() else {
            event.actions.reply(message, format::NOT_CONFIGURED_REPLY).await?;
            return Ok(ForwardOutcome::NotConfigured);
        };

        let mut files = Vec::with_capacity(message.attachments.len());
        for attachment in &message.attachments {
            let data = event.actions.read_attachment(attachment).await?;
            files.push(OutboundFile {
                filename: attachment.filename.clone(),
                description: attachment.description.clone(),
                spoiler: attachment.spoiler,
                data,
            });
        }

        let outbound = OutboundMessage {
            content: format::forwarded_text(message),
            files,
            sticker_ids: message.sticker_ids.clone(),
            suppress_mentions: true,
        };

        match event.actions.deliver(&destination, outbound).await {
            Ok(()) => {
                event
                    .actions
                    .add_reaction(message, format::DELIVERED_REACTION)
                    .await?;
                Ok(ForwardOutcome::Delivered)
            }
            Err(ChannelError::UnknownDestination(dest)) => {
                warn!(destination = %dest, "forwarding destination is not reachable");
                event.actions.reply(message, format::NOT_CONFIGURED_REPLY).await?;
                Ok(ForwardOutcome::NotConfigured)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MessageHandler for Forwarder {
    async fn on_message(&self, event: InboundEvent) {
        match self.forward(&event).await {
            Ok(outcome) => debug!(?outcome, message_id = %event.message.id, "inbound message handled"),
            Err(e) => warn!(error = %e, message_id = %event.message.id, "failed to forward message"),
        }
    }

    fn commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec {
            name: SET_DESTINATION_COMMAND.to_string(),
            description: "Set current channel as forwarding destination".to_string(),
            admin_only: true,
            guild_only: true,
        }]
    }

    async fn on_command(&self, command: SlashCommand) -> Option<String> {
        if command.name != SET_DESTINATION_COMMAND {
            return None;
        }
        if command.guild_id.is_none() {
            return Some(format::GUILD_ONLY_REPLY.to_string());
        }
        info!(channel_id = %command.channel_id, "forwarding destination set");
        self.destinations.set_destination(command.channel_id);
        Some(format::DESTINATION_SET_REPLY.to_string())
    }
}
