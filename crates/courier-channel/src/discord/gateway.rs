//! Discord Gateway (websocket) session.
//!
//! A [`GatewaySession`] is one authenticated websocket: `open` performs the
//! Hello → Identify → READY handshake, `next_event` drives heartbeating and
//! yields dispatch events until the session ends.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use courier_types::Credential;

use crate::channel::ChannelError;
use crate::discord::types::{
    DiscordMessage, GatewayHello, GatewayIdentify, GatewayPayload, GatewayProperties,
    GatewayReady, Interaction,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the handshake may take before the attempt is abandoned.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Gateway close code for a rejected token.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Discord Gateway opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum GatewayOpcode {
    /// Receive: An event was dispatched.
    Dispatch = 0,
    /// Send/Receive: Keep the connection alive.
    Heartbeat = 1,
    /// Send: Start a new session.
    Identify = 2,
    /// Receive: Reconnect to the gateway.
    Reconnect = 7,
    /// Receive: Session invalidated.
    InvalidSession = 9,
    /// Receive: Sent after connecting.
    Hello = 10,
    /// Receive: Heartbeat acknowledged.
    HeartbeatAck = 11,
}

impl TryFrom<i32> for GatewayOpcode {
    type Error = ();

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            7 => Ok(Self::Reconnect),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            _ => Err(()),
        }
    }
}

/// A dispatch event the connection cares about.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    MessageCreate(DiscordMessage),
    InteractionCreate(Interaction),
    Other(String),
}

/// Map a server close frame to an adapter error.
pub fn close_error(code: u16, reason: &str) -> ChannelError {
    match code {
        CLOSE_AUTHENTICATION_FAILED => ChannelError::Authentication(if reason.is_empty() {
            "token rejected by gateway".to_string()
        } else {
            reason.to_string()
        }),
        4010..=4014 => ChannelError::Gateway(format!("fatal gateway close {code}: {reason}")),
        _ => ChannelError::Disconnected {
            code,
            reason: reason.to_string(),
        },
    }
}

fn dispatch_event(event_name: &str, data: serde_json::Value) -> Result<GatewayEvent, ChannelError> {
    let event = match event_name {
        "MESSAGE_CREATE" => GatewayEvent::MessageCreate(serde_json::from_value(data)?),
        "INTERACTION_CREATE" => GatewayEvent::InteractionCreate(serde_json::from_value(data)?),
        other => GatewayEvent::Other(other.to_string()),
    };
    Ok(event)
}

fn frame_close_error(frame: Option<CloseFrame>) -> ChannelError {
    match frame {
        Some(frame) => close_error(u16::from(frame.code), frame.reason.as_str()),
        None => ChannelError::Disconnected {
            code: 1005,
            reason: "closed without status".to_string(),
        },
    }
}

/// One authenticated gateway websocket.
pub struct GatewaySession {
    write: SplitSink<WsStream, WsMessage>,
    read: SplitStream<WsStream>,
    heartbeat: Interval,
    heartbeat_acked: bool,
    sequence: Option<u64>,
    closed: bool,
    pub ready: GatewayReady,
}

impl GatewaySession {
    /// Connect and authenticate.
    pub async fn open(
        gateway_url: &str,
        credential: &Credential,
        intents: u64,
    ) -> Result<Self, ChannelError> {
        let ws_url = format!("{gateway_url}/?v=10&encoding=json");
        info!(url = %ws_url, "connecting to Discord gateway");

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| ChannelError::Gateway(format!("failed to connect websocket: {e}")))?;
        let (write, read) = ws_stream.split();

        tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::handshake(write, read, credential, intents))
            .await
            .map_err(|_| ChannelError::Gateway("handshake timed out".into()))?
    }

    async fn handshake(
        mut write: SplitSink<WsStream, WsMessage>,
        mut read: SplitStream<WsStream>,
        credential: &Credential,
        intents: u64,
    ) -> Result<Self, ChannelError> {
        let hello = match read.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                let payload: GatewayPayload = serde_json::from_str(&text)?;
                if payload.op != GatewayOpcode::Hello as i32 {
                    return Err(ChannelError::Gateway("expected Hello opcode".into()));
                }
                serde_json::from_value::<GatewayHello>(payload.d.unwrap_or_default())?
            }
            Some(Ok(WsMessage::Close(frame))) => return Err(frame_close_error(frame)),
            Some(Ok(msg)) => {
                return Err(ChannelError::Gateway(format!("unexpected message: {msg:?}")));
            }
            Some(Err(e)) => return Err(ChannelError::Gateway(format!("websocket error: {e}"))),
            None => return Err(ChannelError::Gateway("connection closed before Hello".into())),
        };
        debug!(interval_ms = hello.heartbeat_interval, "received Hello");

        let identify = GatewayPayload {
            op: GatewayOpcode::Identify as i32,
            d: Some(serde_json::to_value(GatewayIdentify {
                token: credential.expose().to_string(),
                intents,
                properties: GatewayProperties {
                    os: std::env::consts::OS.into(),
                    browser: "courier".into(),
                    device: "courier".into(),
                },
            })?),
            s: None,
            t: None,
        };
        write
            .send(WsMessage::Text(serde_json::to_string(&identify)?.into()))
            .await
            .map_err(|e| ChannelError::Gateway(format!("failed to send Identify: {e}")))?;

        let mut sequence = None;
        let ready = loop {
            match read.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    let payload: GatewayPayload = serde_json::from_str(&text)?;
                    if payload.s.is_some() {
                        sequence = payload.s;
                    }
                    match GatewayOpcode::try_from(payload.op) {
                        Ok(GatewayOpcode::Dispatch) if payload.t.as_deref() == Some("READY") => {
                            break serde_json::from_value::<GatewayReady>(
                                payload.d.unwrap_or_default(),
                            )?;
                        }
                        Ok(GatewayOpcode::InvalidSession) => {
                            return Err(ChannelError::Gateway(
                                "session invalidated during identify".into(),
                            ));
                        }
                        _ => debug!(op = payload.op, "ignoring frame before READY"),
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => return Err(frame_close_error(frame)),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ChannelError::Gateway(format!("websocket error: {e}"))),
                None => {
                    return Err(ChannelError::Gateway("connection closed before READY".into()));
                }
            }
        };
        info!(user = %ready.user.username, session_id = %ready.session_id, "gateway ready");

        let period = Duration::from_millis(hello.heartbeat_interval.max(1));
        Ok(Self {
            write,
            read,
            heartbeat: interval_at(Instant::now() + period, period),
            heartbeat_acked: true,
            sequence,
            closed: false,
            ready,
        })
    }

    async fn send_heartbeat(&mut self) -> Result<(), ChannelError> {
        let heartbeat = json!({
            "op": GatewayOpcode::Heartbeat as i32,
            "d": self.sequence
        });
        self.write
            .send(WsMessage::Text(heartbeat.to_string().into()))
            .await
            .map_err(|e| ChannelError::Gateway(format!("failed to send heartbeat: {e}")))
    }

    /// Wait for the next dispatch event.
    ///
    /// `Ok(None)` means the gateway ended the session cleanly (reconnect
    /// request or invalidated session) or the session was closed locally.
    pub async fn next_event(&mut self) -> Result<Option<GatewayEvent>, ChannelError> {
        loop {
            if self.closed {
                return Ok(None);
            }

            tokio::select! {
                _ = self.heartbeat.tick() => {
                    if !self.heartbeat_acked {
                        warn!("heartbeat not acknowledged, connection zombied");
                        return Err(ChannelError::Gateway("heartbeat timeout".into()));
                    }
                    self.send_heartbeat().await?;
                    self.heartbeat_acked = false;
                    debug!("sent heartbeat");
                }

                msg = self.read.next() => {
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            let payload: GatewayPayload = match serde_json::from_str(&text) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(error = %e, "failed to parse gateway payload");
                                    continue;
                                }
                            };
                            if payload.s.is_some() {
                                self.sequence = payload.s;
                            }

                            match GatewayOpcode::try_from(payload.op) {
                                Ok(GatewayOpcode::Dispatch) => {
                                    let name = payload.t.unwrap_or_default();
                                    let data = payload.d.unwrap_or_default();
                                    match dispatch_event(&name, data) {
                                        Ok(event) => return Ok(Some(event)),
                                        Err(e) => warn!(event = %name, error = %e, "dropping malformed dispatch"),
                                    }
                                }
                                Ok(GatewayOpcode::HeartbeatAck) => {
                                    self.heartbeat_acked = true;
                                }
                                Ok(GatewayOpcode::Heartbeat) => {
                                    self.send_heartbeat().await?;
                                }
                                Ok(GatewayOpcode::Reconnect) => {
                                    info!("gateway requested reconnect");
                                    return Ok(None);
                                }
                                Ok(GatewayOpcode::InvalidSession) => {
                                    warn!("gateway session invalidated");
                                    return Ok(None);
                                }
                                _ => debug!(op = payload.op, "unhandled opcode"),
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(frame = ?frame, "gateway connection closed by server");
                            return Err(frame_close_error(frame));
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(ChannelError::Gateway(format!("websocket error: {e}")));
                        }
                        None => {
                            return Err(ChannelError::Gateway("connection ended unexpectedly".into()));
                        }
                    }
                }
            }
        }
    }

    /// Send a normal close frame. Errors are ignored; the socket is going away.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "client shutdown".into(),
        };
        if let Err(e) = self.write.send(WsMessage::Close(Some(frame))).await {
            debug!(error = %e, "close frame not sent");
        }
        let _ = self.write.close().await;
        info!("gateway connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn opcode_try_from_known_values() {
        assert_eq!(GatewayOpcode::try_from(0), Ok(GatewayOpcode::Dispatch));
        assert_eq!(GatewayOpcode::try_from(10), Ok(GatewayOpcode::Hello));
        assert_eq!(GatewayOpcode::try_from(11), Ok(GatewayOpcode::HeartbeatAck));
        assert!(GatewayOpcode::try_from(42).is_err());
    }

    #[test]
    fn auth_close_code_is_authentication_error() {
        let err = close_error(4004, "Authentication failed.");
        assert!(matches!(err, ChannelError::Authentication(msg) if msg == "Authentication failed."));
        assert!(matches!(close_error(4004, ""), ChannelError::Authentication(_)));
    }

    #[test]
    fn intent_close_codes_are_fatal_gateway_errors() {
        assert!(matches!(close_error(4014, "Disallowed intent(s)."), ChannelError::Gateway(_)));
    }

    #[test]
    fn other_close_codes_are_disconnects() {
        match close_error(1001, "going away") {
            ChannelError::Disconnected { code, reason } => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "going away");
            }
            other => panic!("expected disconnect, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_maps_message_create() {
        let data = json!({
            "id": "m",
            "channel_id": "c",
            "author": { "id": "u", "username": "x" }
        });
        match dispatch_event("MESSAGE_CREATE", data).unwrap() {
            GatewayEvent::MessageCreate(msg) => assert_eq!(msg.id, "m"),
            other => panic!("expected MESSAGE_CREATE, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_unknown_passthrough() {
        match dispatch_event("TYPING_START", json!({})).unwrap() {
            GatewayEvent::Other(name) => assert_eq!(name, "TYPING_START"),
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn dispatch_malformed_message_is_error() {
        assert!(dispatch_event("MESSAGE_CREATE", json!({ "id": 5 })).is_err());
    }
}
