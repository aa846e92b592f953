//! Kite ticker WebSocket client
//!
//! [`KiteTicker`] owns the socket and runs the connect / read / reconnect
//! loop on its own task. Lifecycle and tick notifications go out on an
//! event channel; subscription requests come in through cloned
//! [`KiteTickerHandle`]s. The task stops once every handle is dropped, the
//! event receiver is dropped, or reconnection gives up.

use super::packet::parse_frame;
use super::reconnect::ReconnectPolicy;
use super::{FeedError, FeedEvent, Mode, TickerFeed};
use crate::config::FeedConfig;
use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;

const COMMAND_BUFFER: usize = 16;

/// Close code reported when the peer sent no close frame
const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported when the connection dropped without a close handshake
const CLOSE_ABNORMAL: u16 = 1006;

/// Outbound request frame: `{"a": <action>, "v": <value>}`
#[derive(Debug, Serialize)]
struct Request<'a, T> {
    a: &'a str,
    v: T,
}

/// Inbound text frame
#[derive(Debug, Deserialize)]
struct TextMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Subscription request frame
pub fn subscribe_message(tokens: &[u32]) -> Result<String, FeedError> {
    Ok(serde_json::to_string(&Request {
        a: "subscribe",
        v: tokens,
    })?)
}

/// Mode change request frame
pub fn mode_message(mode: Mode, tokens: &[u32]) -> Result<String, FeedError> {
    Ok(serde_json::to_string(&Request {
        a: "mode",
        v: (mode.as_str(), tokens),
    })?)
}

#[derive(Debug)]
enum Command {
    Subscribe {
        tokens: Vec<u32>,
        reply: oneshot::Sender<Result<(), FeedError>>,
    },
    SetMode {
        mode: Mode,
        tokens: Vec<u32>,
        reply: oneshot::Sender<Result<(), FeedError>>,
    },
}

/// Why a connected session ended
#[derive(Debug)]
enum SessionEnd {
    /// Connection lost; the event describes how
    Disconnected(FeedEvent),
    /// No handles or no event receiver remain
    Shutdown,
}

/// Kite ticker connection task
pub struct KiteTicker {
    config: FeedConfig,
    policy: ReconnectPolicy,
    events: mpsc::Sender<FeedEvent>,
    commands: mpsc::Receiver<Command>,
}

impl std::fmt::Debug for KiteTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KiteTicker")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .finish()
    }
}

impl KiteTicker {
    /// Create the connection task, a request handle and the event stream
    pub fn new(config: FeedConfig) -> (Self, KiteTickerHandle, mpsc::Receiver<FeedEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let policy = ReconnectPolicy::new(
            config.max_reconnect_attempts,
            config.reconnect_base_delay(),
            config.reconnect_max_delay(),
        );

        let ticker = Self {
            config,
            policy,
            events: event_tx,
            commands: command_rx,
        };
        let handle = KiteTickerHandle {
            commands: command_tx,
        };

        (ticker, handle, event_rx)
    }

    /// Reconnect schedule in use
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Socket URL carrying the credentials as query parameters
    pub fn socket_url(&self) -> Result<Url, FeedError> {
        let mut url = Url::parse(&self.config.url)?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.config.api_key)
            .append_pair("access_token", &self.config.access_token);
        Ok(url)
    }

    /// Run the connection until shutdown or until reconnection gives up
    pub async fn serve(mut self) {
        let url = match self.socket_url() {
            Ok(url) => url,
            Err(e) => {
                error!("Invalid Kite ticker URL: {}", e);
                let _ = self.events.send(FeedEvent::Error(e.to_string())).await;
                let _ = self.events.send(FeedEvent::GaveUp { attempt: 0 }).await;
                return;
            }
        };
        let host = url.host_str().unwrap_or_default().to_string();

        let mut attempt = 0u32;
        loop {
            match self.connect(&url).await {
                Ok(stream) => {
                    info!("Connected to Kite ticker at {}", host);
                    attempt = 0;
                    if !self.emit(FeedEvent::Connected).await {
                        return;
                    }
                    match self.pump(stream).await {
                        SessionEnd::Shutdown => {
                            info!("Kite ticker shut down");
                            return;
                        }
                        SessionEnd::Disconnected(event) => {
                            if !self.emit(event).await {
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Kite ticker connection to {} failed: {}", host, e);
                    if !self.emit(FeedEvent::Error(e.to_string())).await {
                        return;
                    }
                }
            }

            attempt += 1;
            let Some(delay) = self.policy.delay(attempt) else {
                let made = attempt - 1;
                error!("Giving up on Kite ticker after {} reconnect attempts", made);
                let _ = self.events.send(FeedEvent::GaveUp { attempt: made }).await;
                return;
            };

            info!("Reconnecting to Kite ticker in {:?} (attempt {})", delay, attempt);
            if !self.emit(FeedEvent::Reconnecting { attempt, delay }).await {
                return;
            }
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect(&self, url: &Url) -> Result<WsStream, FeedError> {
        let timeout = self.config.connect_timeout();
        match tokio::time::timeout(timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, response))) => {
                debug!("Handshake response status: {}", response.status());
                Ok(stream)
            }
            Ok(Err(e)) => Err(FeedError::WebSocket(e)),
            Err(_) => Err(FeedError::ConnectTimeout(timeout)),
        }
    }

    async fn emit(&self, event: FeedEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!("Feed event receiver dropped");
            return false;
        }
        true
    }

    async fn pump(&mut self, stream: WsStream) -> SessionEnd {
        let (mut write, mut read) = stream.split();
        let read_timeout = self.config.read_timeout();
        let commands = &mut self.commands;
        let events = &self.events;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => dispatch(&mut write, command).await,
                    None => {
                        debug!("All ticker handles dropped, closing connection");
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                },

                frame = tokio::time::timeout(read_timeout, read.next()) => {
                    let frame = match frame {
                        Ok(frame) => frame,
                        Err(_) => {
                            warn!("No data from Kite ticker for {:?}", read_timeout);
                            let stalled = FeedError::Stalled(read_timeout);
                            return SessionEnd::Disconnected(FeedEvent::Error(stalled.to_string()));
                        }
                    };

                    match handle_frame(frame, events, &mut write).await {
                        FrameResult::Continue => {}
                        FrameResult::End(end) => return end,
                    }
                }
            }
        }
    }
}

enum FrameResult {
    Continue,
    End(SessionEnd),
}

async fn handle_frame(
    frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    events: &mpsc::Sender<FeedEvent>,
    write: &mut WsWrite,
) -> FrameResult {
    match frame {
        Some(Ok(Message::Binary(data))) => {
            if data.len() == 1 {
                debug!("Received heartbeat");
                return FrameResult::Continue;
            }
            for tick in parse_frame(&data, Utc::now()) {
                if events.send(FeedEvent::Tick(tick)).await.is_err() {
                    return FrameResult::End(SessionEnd::Shutdown);
                }
            }
            FrameResult::Continue
        }
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<TextMessage>(&text) {
            Ok(message) if message.kind == "error" => {
                let reason = message
                    .data
                    .as_str()
                    .map_or_else(|| message.data.to_string(), str::to_string);
                warn!("Kite ticker error: {}", reason);
                if events.send(FeedEvent::Error(reason)).await.is_err() {
                    return FrameResult::End(SessionEnd::Shutdown);
                }
                FrameResult::Continue
            }
            Ok(message) if message.kind == "message" => {
                info!("Kite ticker message: {}", message.data);
                FrameResult::Continue
            }
            Ok(message) => {
                debug!("Ignoring Kite ticker {} message", message.kind);
                FrameResult::Continue
            }
            Err(e) => {
                debug!("Unrecognised text frame: {}", e);
                FrameResult::Continue
            }
        },
        Some(Ok(Message::Ping(payload))) => {
            if let Err(e) = write.send(Message::Pong(payload)).await {
                return FrameResult::End(SessionEnd::Disconnected(FeedEvent::Error(e.to_string())));
            }
            FrameResult::Continue
        }
        Some(Ok(Message::Close(frame))) => {
            let (code, reason) = frame.map_or_else(
                || (CLOSE_NO_STATUS, String::new()),
                |frame| (u16::from(frame.code), frame.reason.to_string()),
            );
            info!("Kite ticker closed the connection: {} {}", code, reason);
            FrameResult::End(SessionEnd::Disconnected(FeedEvent::Closed { code, reason }))
        }
        Some(Ok(_)) => FrameResult::Continue,
        Some(Err(e)) => {
            warn!("Kite ticker read error: {}", e);
            FrameResult::End(SessionEnd::Disconnected(FeedEvent::Error(e.to_string())))
        }
        None => FrameResult::End(SessionEnd::Disconnected(FeedEvent::Closed {
            code: CLOSE_ABNORMAL,
            reason: String::from("connection dropped"),
        })),
    }
}

async fn dispatch(write: &mut WsWrite, command: Command) {
    let (frame, reply) = match command {
        Command::Subscribe { tokens, reply } => {
            debug!("Subscribing to {} instruments", tokens.len());
            (subscribe_message(&tokens), reply)
        }
        Command::SetMode {
            mode,
            tokens,
            reply,
        } => {
            debug!("Setting {} mode for {} instruments", mode, tokens.len());
            (mode_message(mode, &tokens), reply)
        }
    };

    let result = match frame {
        Ok(text) => write.send(Message::Text(text)).await.map_err(FeedError::from),
        Err(e) => Err(e),
    };
    // The requester may have given up waiting.
    let _ = reply.send(result);
}

/// Cloneable request handle for a running [`KiteTicker`]
#[derive(Debug, Clone)]
pub struct KiteTickerHandle {
    commands: mpsc::Sender<Command>,
}

impl KiteTickerHandle {
    async fn request(
        &self,
        command: Command,
        reply: oneshot::Receiver<Result<(), FeedError>>,
    ) -> Result<(), FeedError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FeedError::Stopped)?;
        reply.await.map_err(|_| FeedError::NoReply)?
    }
}

#[async_trait]
impl TickerFeed for KiteTickerHandle {
    async fn subscribe(&self, tokens: &[u32]) -> Result<(), FeedError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::Subscribe {
            tokens: tokens.to_vec(),
            reply,
        };
        self.request(command, rx).await
    }

    async fn set_mode(&self, mode: Mode, tokens: &[u32]) -> Result<(), FeedError> {
        let (reply, rx) = oneshot::channel();
        let command = Command::SetMode {
            mode,
            tokens: tokens.to_vec(),
            reply,
        };
        self.request(command, rx).await
    }
}
