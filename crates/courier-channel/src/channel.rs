//! Core platform traits and the adapter error type.
//!
//! A [`Platform`] turns a credential into a live [`Connection`]. The
//! connection owns the socket for its whole lifetime: one task drives
//! [`Connection::run`] and the same task calls [`Connection::close`], so the
//! socket is never touched from two threads.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use courier_types::{CourierError, Credential};

use crate::message::{Attachment, CommandSpec, InboundEvent, InboundMessage, OutboundMessage, SlashCommand};

/// Errors from platform operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("connection closed by server (code {code}): {reason}")]
    Disconnected { code: u16, reason: String },

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(String),
}

impl From<ChannelError> for CourierError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Authentication(msg) => CourierError::Authentication(msg),
            ChannelError::InvalidCredential(msg) => CourierError::InvalidCredential(msg),
            e @ (ChannelError::Http(_)
            | ChannelError::Gateway(_)
            | ChannelError::Disconnected { .. }) => CourierError::TransientDisconnect(e.to_string()),
            other => CourierError::UnexpectedRunnerFailure(other.to_string()),
        }
    }
}

/// A chat platform the supervisor can connect to.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Reject credentials that can never work, before any connection attempt.
    fn validate_credential(&self, _credential: &Credential) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Establish an authenticated connection.
    ///
    /// Fails with [`ChannelError::Authentication`] when the platform rejects
    /// the credential.
    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Connection>, ChannelError>;
}

/// One live, authenticated platform connection.
#[async_trait]
pub trait Connection: Send {
    /// Install the handler that receives inbound events.
    fn on_message(&mut self, handler: Arc<dyn MessageHandler>);

    /// Blocking receive loop.
    ///
    /// Returns `Ok(())` when the platform ends the session cleanly and an
    /// error when the connection fails.
    async fn run(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection. Safe to call more than once.
    async fn close(&mut self);
}

/// Consumer of inbound platform events.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, event: InboundEvent);

    /// Slash commands this handler wants registered on connect.
    fn commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    /// Handle a slash command; the returned text is sent as the response.
    async fn on_command(&self, _command: SlashCommand) -> Option<String> {
        None
    }
}

/// Affordances attached to an inbound message.
#[async_trait]
pub trait MessageActions: Send + Sync {
    /// Reply in the conversation the message came from.
    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), ChannelError>;

    /// React to the message with an emoji.
    async fn add_reaction(&self, message: &InboundMessage, symbol: &str) -> Result<(), ChannelError>;

    /// Fetch the bytes of an attachment.
    async fn read_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError>;

    /// Send a message to a destination channel.
    ///
    /// Fails with [`ChannelError::UnknownDestination`] if the destination
    /// does not exist or is not visible to the bot.
    async fn deliver(&self, destination: &str, message: OutboundMessage) -> Result<(), ChannelError>;
}
