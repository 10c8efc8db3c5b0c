//! User-facing text produced by the forwarder.

use crate::message::InboundMessage;

/// Reply sent when a message cannot be delivered because no destination is set.
pub const NOT_CONFIGURED_REPLY: &str =
    "Oops... It looks like the bot is not configured yet, so your message cannot be delivered";

/// Response to a successful `set_destination`.
pub const DESTINATION_SET_REPLY: &str = "This channel was set as forwarding destination";

/// Response when `set_destination` is used outside a server channel.
pub const GUILD_ONLY_REPLY: &str = "This command can only be used in a server channel";

/// Reaction added to a message once it has been forwarded.
pub const DELIVERED_REACTION: &str = "\u{2705}";

/// Prefix the platform uses to mark an uploaded file as a spoiler.
pub const SPOILER_PREFIX: &str = "SPOILER_";

/// Body of a forwarded message.
pub fn forwarded_text(message: &InboundMessage) -> String {
    format!("User {} sent: {}", message.author.mention(), message.content)
}

/// Upload filename, prefixed when the file is a spoiler.
pub fn upload_filename(filename: &str, spoiler: bool) -> String {
    if spoiler && !filename.starts_with(SPOILER_PREFIX) {
        format!("{SPOILER_PREFIX}{filename}")
    } else {
        filename.to_string()
    }
}
