//! Raw HTTP calls to the Discord REST API.
//!
//! Covers message creation (with file uploads), reactions, attachment
//! downloads, command registration and interaction responses.

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, Url};
use serde_json::{json, Value};
use tracing::{debug, warn};

use courier_types::Credential;

use crate::channel::ChannelError;
use crate::format;
use crate::message::{CommandSpec, OutboundMessage};

/// Permission bit for administrators, as a decimal string.
const ADMINISTRATOR_PERMISSION: &str = "8";

/// Interaction callback: respond with a channel message.
const CALLBACK_CHANNEL_MESSAGE: u8 = 4;

/// Low-level Discord REST client.
pub struct DiscordApi {
    client: Client,
    base_url: Url,
    auth_header: String,
}

impl DiscordApi {
    pub fn new(base_url: &str, credential: &Credential) -> Result<Self, ChannelError> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| ChannelError::Gateway(format!("invalid API base URL {base_url}: {e}")))?;
        Ok(Self {
            client: Client::new(),
            base_url,
            auth_header: format!("Bot {}", credential.expose()),
        })
    }

    /// Build an endpoint URL; each segment is percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ChannelError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ChannelError::Gateway("API base URL cannot have a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: Response) -> Result<Response, ChannelError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable>".to_string());
        if status.as_u16() == 401 {
            return Err(ChannelError::Authentication(body));
        }
        Err(ChannelError::Api {
            status: status.as_u16(),
            message: body,
        })
    }

    /// Post a message to a channel, optionally as a reply to `reply_to`.
    pub async fn create_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut payload = json!({ "content": message.content });
        if message.suppress_mentions {
            payload["allowed_mentions"] = json!({ "parse": [] });
        }
        if !message.sticker_ids.is_empty() {
            payload["sticker_ids"] = json!(message.sticker_ids);
        }
        if let Some(message_id) = reply_to {
            payload["message_reference"] = json!({ "message_id": message_id });
        }

        let url = self.endpoint(&["channels", channel_id, "messages"])?;
        let request = self.client.post(url).header("Authorization", &self.auth_header);

        let request = if message.files.is_empty() {
            request.json(&payload)
        } else {
            let attachments: Vec<Value> = message
                .files
                .iter()
                .enumerate()
                .map(|(i, f)| {
                    json!({
                        "id": i,
                        "filename": format::upload_filename(&f.filename, f.spoiler),
                        "description": f.description,
                    })
                })
                .collect();
            payload["attachments"] = Value::Array(attachments);

            let mut form = Form::new().text("payload_json", payload.to_string());
            for (i, file) in message.files.iter().enumerate() {
                let part = Part::bytes(file.data.clone())
                    .file_name(format::upload_filename(&file.filename, file.spoiler));
                form = form.part(format!("files[{i}]"), part);
            }
            request.multipart(form)
        };

        debug!(channel_id, files = message.files.len(), "create message");
        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// React to a message as the bot user.
    pub async fn create_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), ChannelError> {
        let url = self.endpoint(&[
            "channels", channel_id, "messages", message_id, "reactions", emoji, "@me",
        ])?;
        let response = self
            .client
            .put(url)
            .header("Authorization", &self.auth_header)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Download an attachment from the CDN.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, ChannelError> {
        let response = Self::check(self.client.get(url).send().await?).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Replace the application's global commands with `commands`.
    pub async fn bulk_overwrite_commands(
        &self,
        application_id: &str,
        commands: &[CommandSpec],
    ) -> Result<(), ChannelError> {
        let body: Vec<Value> = commands
            .iter()
            .map(|c| {
                let mut cmd = json!({
                    "name": c.name,
                    "description": c.description,
                    "type": 1,
                    "dm_permission": !c.guild_only,
                });
                if c.admin_only {
                    cmd["default_member_permissions"] = json!(ADMINISTRATOR_PERMISSION);
                }
                cmd
            })
            .collect();

        let url = self.endpoint(&["applications", application_id, "commands"])?;
        let response = self
            .client
            .put(url)
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send()
            .await?;
        if let Err(e) = Self::check(response).await {
            warn!(error = %e, "command registration rejected");
            return Err(e);
        }
        Ok(())
    }

    /// Answer an interaction with a plain message.
    pub async fn create_interaction_response(
        &self,
        interaction_id: &str,
        interaction_token: &str,
        content: &str,
    ) -> Result<(), ChannelError> {
        let url = self.endpoint(&["interactions", interaction_id, interaction_token, "callback"])?;
        let body = json!({
            "type": CALLBACK_CHANNEL_MESSAGE,
            "data": { "content": content },
        });
        let response = self.client.post(url).json(&body).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
