//! Chat-platform adapter for the supervised client.
//!
//! The supervisor only depends on the [`Platform`] / [`Connection`] traits;
//! message forwarding depends on [`MessageHandler`] / [`MessageActions`].
//! Neither side sees a concrete Discord type.
//!
//! # Architecture
//!
//! - [`channel`]: platform, connection and handler traits plus [`ChannelError`]
//! - [`message`]: inbound message model and outbound payloads
//! - [`format`]: user-facing text
//! - [`forward`]: direct-message forwarding and the `set_destination` command
//! - [`discord`]: Discord gateway (websocket) and REST implementation

pub mod channel;
pub mod discord;
pub mod format;
pub mod forward;
pub mod message;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{ChannelError, Connection, MessageActions, MessageHandler, Platform};
pub use discord::DiscordPlatform;
pub use forward::{DestinationStore, ForwardOutcome, Forwarder};
pub use message::{
    Attachment, Author, CommandSpec, InboundEvent, InboundMessage, OutboundFile,
    OutboundMessage, SlashCommand,
};
