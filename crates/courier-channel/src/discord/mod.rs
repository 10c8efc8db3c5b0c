//! Discord bot adapter.
//!
//! Inbound events arrive over the gateway websocket ([`gateway`]); everything
//! the bot does in response goes through the REST API ([`api`]).

pub mod api;
pub mod gateway;
pub mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use courier_types::{Credential, DiscordSettings};

use crate::channel::{ChannelError, Connection, MessageActions, MessageHandler, Platform};
use crate::message::{Attachment, InboundEvent, InboundMessage, OutboundMessage};

use self::api::DiscordApi;
use self::gateway::{GatewayEvent, GatewaySession};

/// Discord as a [`Platform`].
pub struct DiscordPlatform {
    settings: DiscordSettings,
}

impl DiscordPlatform {
    pub fn new(settings: DiscordSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Platform for DiscordPlatform {
    fn name(&self) -> &str {
        "discord"
    }

    /// Bot tokens are three non-empty dot-separated parts.
    fn validate_credential(&self, credential: &Credential) -> Result<(), ChannelError> {
        let parts: Vec<&str> = credential.expose().split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(ChannelError::InvalidCredential(
                "not a Discord bot token".to_string(),
            ));
        }
        Ok(())
    }

    async fn connect(&self, credential: &Credential) -> Result<Box<dyn Connection>, ChannelError> {
        self.validate_credential(credential)?;
        let api = Arc::new(DiscordApi::new(&self.settings.api_base, credential)?);
        let session =
            GatewaySession::open(&self.settings.gateway_url, credential, self.settings.intents)
                .await?;

        let self_id = session.ready.user.id.clone();
        let application_id = session.ready.application.as_ref().map(|a| a.id.clone());
        info!(user_id = %self_id, "discord connection established");

        Ok(Box::new(DiscordConnection {
            session,
            actions: Arc::new(DiscordActions { api: api.clone() }),
            api,
            handler: None,
            tasks: HandlerTasks::default(),
            self_id,
            application_id,
        }))
    }
}

/// One live gateway session plus the REST client that acts on its events.
pub struct DiscordConnection {
    session: GatewaySession,
    api: Arc<DiscordApi>,
    actions: Arc<DiscordActions>,
    handler: Option<Arc<dyn MessageHandler>>,
    tasks: HandlerTasks,
    self_id: String,
    application_id: Option<String>,
}

/// How long `close` waits for in-flight handler calls.
const HANDLER_DRAIN: Duration = Duration::from_secs(2);

/// Handler calls spawned for inbound events, owned by the connection so
/// they finish (or are aborted) before the runtime goes away.
#[derive(Default)]
struct HandlerTasks {
    set: JoinSet<()>,
}

impl HandlerTasks {
    fn spawn(&mut self, task: impl Future<Output = ()> + Send + 'static) {
        self.reap();
        self.set.spawn(task);
    }

    /// Drop bookkeeping for tasks that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.set.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    warn!("message handler panicked");
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.set.len()
    }

    /// Wait up to `grace` for in-flight tasks, then abort the rest.
    async fn drain(&mut self, grace: Duration) {
        if self.set.is_empty() {
            return;
        }
        let pending = self.len();
        let finished = tokio::time::timeout(grace, async {
            while self.set.join_next().await.is_some() {}
        })
        .await;
        if finished.is_err() {
            warn!(pending, remaining = self.set.len(), "aborting unfinished message handlers");
            self.set.shutdown().await;
        }
    }
}

async fn register_commands(
    api: &DiscordApi,
    application_id: Option<&str>,
    handler: &dyn MessageHandler,
) {
    let commands = handler.commands();
    if commands.is_empty() {
        return;
    }
    let Some(application_id) = application_id else {
        warn!("READY carried no application id; slash commands not registered");
        return;
    };
    match api.bulk_overwrite_commands(application_id, &commands).await {
        Ok(()) => info!(count = commands.len(), "slash commands registered"),
        Err(e) => warn!(error = %e, "failed to register slash commands"),
    }
}

impl DiscordConnection {
    fn dispatch(&mut self, event: GatewayEvent) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        match event {
            GatewayEvent::MessageCreate(message) => {
                let event = InboundEvent {
                    message: message.into_inbound(&self.self_id),
                    actions: self.actions.clone(),
                };
                self.tasks
                    .spawn(async move { handler.on_message(event).await });
            }
            GatewayEvent::InteractionCreate(interaction) => {
                let Some(command) = interaction.to_command() else {
                    debug!(kind = interaction.kind, "ignoring non-command interaction");
                    return;
                };
                let api = self.api.clone();
                self.tasks.spawn(async move {
                    let name = command.name.clone();
                    let Some(reply) = handler.on_command(command).await else {
                        debug!(command = %name, "command not handled");
                        return;
                    };
                    if let Err(e) = api
                        .create_interaction_response(&interaction.id, &interaction.token, &reply)
                        .await
                    {
                        warn!(command = %name, error = %e, "failed to answer interaction");
                    }
                });
            }
            GatewayEvent::Other(name) => debug!(event = %name, "ignoring dispatch"),
        }
    }
}

#[async_trait]
impl Connection for DiscordConnection {
    fn on_message(&mut self, handler: Arc<dyn MessageHandler>) {
        self.handler = Some(handler);
    }

    async fn run(&mut self) -> Result<(), ChannelError> {
        if let Some(handler) = self.handler.clone() {
            register_commands(&self.api, self.application_id.as_deref(), handler.as_ref()).await;
        }
        while let Some(event) = self.session.next_event().await? {
            self.dispatch(event);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.tasks.drain(HANDLER_DRAIN).await;
        self.session.close().await;
    }
}

/// [`MessageActions`] backed by the REST API.
pub struct DiscordActions {
    api: Arc<DiscordApi>,
}

impl DiscordActions {
    pub fn new(api: Arc<DiscordApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MessageActions for DiscordActions {
    async fn reply(&self, message: &InboundMessage, text: &str) -> Result<(), ChannelError> {
        self.api
            .create_message(&message.channel_id, &OutboundMessage::text(text), Some(&message.id))
            .await
    }

    async fn add_reaction(&self, message: &InboundMessage, symbol: &str) -> Result<(), ChannelError> {
        self.api
            .create_reaction(&message.channel_id, &message.id, symbol)
            .await
    }

    async fn read_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ChannelError> {
        self.api.download(&attachment.url).await
    }

    async fn deliver(&self, destination: &str, message: OutboundMessage) -> Result<(), ChannelError> {
        match self.api.create_message(destination, &message, None).await {
            Err(ChannelError::Api {
                status: 400 | 403 | 404,
                message,
            }) => {
                debug!(destination, response = %message, "destination rejected");
                Err(ChannelError::UnknownDestination(destination.to_string()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Author;
    use serde_json::json;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    fn credential(raw: &str) -> Credential {
        Credential::parse(raw).unwrap()
    }

    fn actions_for_mock(server: &MockServer) -> DiscordActions {
        let api = DiscordApi::new(&server.uri(), &credential("abc.def.ghi")).unwrap();
        DiscordActions::new(Arc::new(api))
    }

    fn dm() -> InboundMessage {
        InboundMessage {
            id: "m-7".into(),
            channel_id: "dm-3".into(),
            guild_id: None,
            author: Author {
                id: "u".into(),
                name: "u".into(),
                bot: false,
            },
            content: "hi".into(),
            attachments: vec![],
            sticker_ids: vec![],
            from_self: false,
        }
    }

    #[tokio::test]
    async fn drain_waits_for_in_flight_handlers() {
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut tasks = HandlerTasks::default();
        let flag = done.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        });

        tasks.drain(Duration::from_secs(5)).await;
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(tasks.len(), 0);
    }

    #[tokio::test]
    async fn drain_aborts_handlers_past_the_grace_period() {
        let mut tasks = HandlerTasks::default();
        tasks.spawn(std::future::pending());
        tasks.spawn(async {});

        let started = std::time::Instant::now();
        tasks.drain(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(tasks.len(), 0);
    }

    #[tokio::test]
    async fn finished_handlers_are_reaped_on_spawn() {
        let mut tasks = HandlerTasks::default();
        tasks.spawn(async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        tasks.spawn(std::future::pending());
        assert_eq!(tasks.len(), 1);
        tasks.drain(Duration::from_millis(10)).await;
    }

    #[test]
    fn token_shape_is_validated() {
        let platform = DiscordPlatform::new(DiscordSettings::default());
        assert!(platform.validate_credential(&credential("aaa.bbb.ccc")).is_ok());
        assert!(matches!(
            platform.validate_credential(&credential("no-dots")),
            Err(ChannelError::InvalidCredential(_))
        ));
        assert!(platform.validate_credential(&credential("a..c")).is_err());
        assert_eq!(platform.name(), "discord");
    }

    #[tokio::test]
    async fn malformed_token_never_connects() {
        let platform = DiscordPlatform::new(DiscordSettings {
            gateway_url: "ws://127.0.0.1:9".into(),
            ..DiscordSettings::default()
        });
        let err = platform.connect(&credential("garbage")).await.err().unwrap();
        assert!(matches!(err, ChannelError::InvalidCredential(_)));
    }

    #[tokio::test]
    async fn deliver_maps_missing_channel_to_unknown_destination() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/channels/404/messages"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "code": 10003 })))
            .mount(&server)
            .await;

        let actions = actions_for_mock(&server);
        let err = actions
            .deliver("404", OutboundMessage::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::UnknownDestination(d) if d == "404"));
    }

    #[tokio::test]
    async fn deliver_keeps_server_errors() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let actions = actions_for_mock(&server);
        let err = actions
            .deliver("1", OutboundMessage::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn reply_references_original_message() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/channels/dm-3/messages"))
            .and(matchers::body_json(json!({
                "content": "pong",
                "message_reference": { "message_id": "m-7" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "r" })))
            .expect(1)
            .mount(&server)
            .await;

        let actions = actions_for_mock(&server);
        actions.reply(&dm(), "pong").await.unwrap();
    }
}
