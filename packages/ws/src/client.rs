//! Connection management for the multiplexed subscription socket.
//!
//! [`SubscriptionClient::start`] owns the connect loop: it establishes the
//! websocket, replays every live registry entry so server-side state matches
//! client-side intent, pumps frames in both directions, emits heartbeats on a
//! fixed cadence while open, and reconnects after a fixed delay when the
//! transport drops. A [`SubscriptionHandle`] is the consumer's side: it
//! registers and removes subscriptions and can close the connection for good.
//!
//! Closing through the handle (or receiving an application-level error frame)
//! cancels the client's token, which suppresses any further reconnect.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::UnboundedSender;
use futures_util::{StreamExt as _, future, pin_mut};
use modelboard_models::{ResourceEvent, ResourceType};
use serde_json::Value;
use thiserror::Error;
use tokio::select;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error, Message, http::StatusCode},
};
use tokio_util::sync::CancellationToken;

use crate::dispatch;
use crate::models::{InboundMessage, OutboundMessage};
use crate::registry::{ResourceCallback, SubscriptionId, SubscriptionRegistry};

/// Heartbeat cadence while the socket is open.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Delay before each reconnect attempt after the transport drops.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Error type for websocket send operations.
#[derive(Debug, Error)]
pub enum WebsocketSendError {
    /// An unknown error occurred during the send operation.
    #[error("Unknown: {0}")]
    Unknown(String),
}

/// Error type for websocket connection failures.
#[derive(Debug, Error)]
pub enum ConnectWsError {
    /// The websocket connection was rejected with an HTTP 401 Unauthorized
    /// response.
    #[error("Unauthorized")]
    Unauthorized,
}

/// Callback invoked with the server's message when an application-level error
/// frame arrives, before the connection self-closes.
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Trait for types that can send frames over the subscription connection.
#[async_trait]
pub trait SubscriptionSender: Send + Sync {
    /// Sends an outbound frame.
    ///
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the send operation fails
    async fn send(&self, frame: OutboundMessage) -> Result<(), WebsocketSendError>;

    /// Sends a heartbeat frame.
    ///
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the send operation fails
    async fn heartbeat(&self) -> Result<(), WebsocketSendError>;
}

impl core::fmt::Debug for dyn SubscriptionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{SubscriptionSender}}")
    }
}

/// Consumer handle to a subscription connection.
///
/// Subscriptions registered while disconnected are retained and replayed once
/// the connection (re)establishes.
#[derive(Clone)]
pub struct SubscriptionHandle {
    registry: Arc<RwLock<SubscriptionRegistry>>,
    sender: Arc<RwLock<Option<UnboundedSender<OutboundMessage>>>>,
    cancellation_token: CancellationToken,
}

impl SubscriptionHandle {
    /// Registers interest in a set of entities and sends a `subscribe` frame
    /// for them.
    ///
    /// The returned id removes exactly this entry again via
    /// [`Self::unsubscribe`].
    ///
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the subscribe frame fails
    ///   to enqueue. The entry is rolled back, leaving the registry unchanged.
    ///
    /// # Panics
    ///
    /// * If the registry `RwLock` is poisoned
    pub fn subscribe(
        &self,
        resource_type: ResourceType,
        uids: impl IntoIterator<Item = String>,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, WebsocketSendError> {
        let (id, frame) = self.registry.write().unwrap().add(
            resource_type,
            uids,
            Arc::new(callback) as ResourceCallback,
        );
        if let Err(e) = self.send_frame(frame) {
            self.registry.write().unwrap().remove(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Removes a subscription entry.
    ///
    /// An `unsubscribe` frame is sent only for the uids no longer referenced
    /// by any remaining entry of the same resource type.
    ///
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the unsubscribe frame
    ///   fails to enqueue
    ///
    /// # Panics
    ///
    /// * If the registry `RwLock` is poisoned
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), WebsocketSendError> {
        let frame = self.registry.write().unwrap().remove(id);
        if let Some(frame) = frame {
            self.send_frame(frame)?;
        }
        Ok(())
    }

    /// Closes the connection.
    ///
    /// This is a self-close: the client will not reconnect afterwards, even
    /// if the transport close event arrives later.
    pub fn close(&self) {
        self.cancellation_token.cancel();
    }

    /// Whether the connection has been closed for good.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// # Panics
    ///
    /// * If the sender `RwLock` is poisoned
    fn send_frame(&self, frame: OutboundMessage) -> Result<(), WebsocketSendError> {
        if let Some(sender) = self.sender.read().unwrap().as_ref() {
            sender
                .unbounded_send(frame)
                .map_err(|e| WebsocketSendError::Unknown(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SubscriptionSender for SubscriptionHandle {
    async fn send(&self, frame: OutboundMessage) -> Result<(), WebsocketSendError> {
        self.send_frame(frame)
    }

    async fn heartbeat(&self) -> Result<(), WebsocketSendError> {
        self.send_frame(OutboundMessage::Heartbeat)
    }
}

/// A websocket client multiplexing live-resource subscriptions over one
/// connection.
#[derive(Clone)]
pub struct SubscriptionClient {
    url: String,
    registry: Arc<RwLock<SubscriptionRegistry>>,
    sender: Arc<RwLock<Option<UnboundedSender<OutboundMessage>>>>,
    cancellation_token: CancellationToken,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
    on_error: Option<ErrorHandler>,
}

impl SubscriptionClient {
    /// Creates a new subscription client for the given URL.
    ///
    /// Returns a tuple containing the client and a handle to register
    /// subscriptions and close the connection.
    #[must_use]
    pub fn new(url: String) -> (Self, SubscriptionHandle) {
        let registry = Arc::new(RwLock::new(SubscriptionRegistry::new()));
        let sender = Arc::new(RwLock::new(None));
        let cancellation_token = CancellationToken::new();

        let handle = SubscriptionHandle {
            registry: registry.clone(),
            sender: sender.clone(),
            cancellation_token: cancellation_token.clone(),
        };

        (
            Self {
                url,
                registry,
                sender,
                cancellation_token,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
                on_error: None,
            },
            handle,
        )
    }

    /// Sets the heartbeat cadence.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the delay before each reconnect attempt.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets a handler invoked with the server's message when an
    /// application-level error frame arrives.
    #[must_use]
    pub fn with_error_handler(mut self, handler: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Starts the websocket connection with automatic reconnection on
    /// transport failure.
    ///
    /// Runs until the handle closes the connection or an application-level
    /// error frame arrives.
    ///
    /// # Errors
    ///
    /// * Returns [`ConnectWsError::Unauthorized`] if the websocket connection
    ///   is unauthorized
    ///
    /// # Panics
    ///
    /// * If the registry or sender `RwLock` is poisoned
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub async fn start(&self) -> Result<(), ConnectWsError> {
        let url = self.url.clone();
        let sender_arc = self.sender.clone();
        let registry = self.registry.clone();
        let cancellation_token = self.cancellation_token.clone();
        let on_error = self.on_error.clone();

        let mut just_retried = false;

        loop {
            let close_token = CancellationToken::new();

            let (txf, rxf) = futures_channel::mpsc::unbounded::<OutboundMessage>();

            sender_arc.write().unwrap().replace(txf.clone());

            log::debug!("Connecting to subscription websocket '{url}'...");
            #[allow(clippy::redundant_pub_crate)]
            match select!(
                resp = connect_async(url.as_str()) => resp,
                () = cancellation_token.cancelled() => {
                    log::debug!("Cancelling connect");
                    break;
                }
            ) {
                Ok((ws_stream, _)) => {
                    log::debug!("WebSocket handshake has been successfully completed");

                    if just_retried {
                        log::info!("WebSocket successfully reconnected");
                    }

                    // Re-sync server-side subscription state with the
                    // registry after the connection reset.
                    for frame in registry.read().unwrap().replay_frames() {
                        if let Err(e) = txf.unbounded_send(frame) {
                            log::error!("Failed to replay subscription: {e:?}");
                        }
                    }

                    let (write, read) = ws_stream.split();

                    let ws_writer = rxf
                        .filter_map(|frame| {
                            let message = match serde_json::to_string(&frame) {
                                Ok(json) => {
                                    log::trace!("Sending frame: {json}");
                                    Some(Ok(Message::Text(json.into())))
                                }
                                Err(e) => {
                                    log::error!("Failed to serialize outbound frame: {e:?}");
                                    None
                                }
                            };
                            future::ready(message)
                        })
                        .forward(write);

                    let ws_reader = read.for_each(|m| {
                        let close_token = close_token.clone();
                        let cancellation_token = cancellation_token.clone();
                        let registry = registry.clone();
                        let on_error = on_error.clone();

                        async move {
                            let m = match m {
                                Ok(m) => m,
                                Err(e) => {
                                    log::error!("Read loop error: {e:?}");
                                    close_token.cancel();
                                    return;
                                }
                            };

                            match m {
                                Message::Text(text) => {
                                    handle_frame(
                                        &registry,
                                        text.as_str(),
                                        on_error.as_ref(),
                                        &cancellation_token,
                                    );
                                }
                                Message::Ping(_) | Message::Pong(_) => {
                                    log::trace!("Received transport keepalive");
                                }
                                Message::Close(_) => {
                                    log::debug!("Received close frame from server");
                                    close_token.cancel();
                                }
                                Message::Binary(_) | Message::Frame(_) => {
                                    log::warn!("Ignoring non-text frame");
                                }
                            }
                        }
                    });

                    let heartbeat_interval = self.heartbeat_interval;
                    let heartbeater = tokio::spawn({
                        let txf = txf.clone();
                        let close_token = close_token.clone();
                        let cancellation_token = cancellation_token.clone();

                        async move {
                            loop {
                                select!(
                                    () = close_token.cancelled() => { break; }
                                    () = cancellation_token.cancelled() => { break; }
                                    () = sleep(heartbeat_interval) => {
                                        log::trace!("Sending heartbeat to server");
                                        if let Err(e) = txf.unbounded_send(OutboundMessage::Heartbeat) {
                                            log::error!("Heartbeat send error: {e:?}");
                                            close_token.cancel();
                                            break;
                                        }
                                    }
                                );
                            }
                        }
                    });

                    pin_mut!(ws_writer, ws_reader);
                    #[allow(clippy::redundant_pub_crate)]
                    {
                        select!(
                            () = close_token.cancelled() => {}
                            () = cancellation_token.cancelled() => {}
                            _ = future::select(ws_writer, ws_reader) => {}
                        );
                    }
                    if !close_token.is_cancelled() {
                        close_token.cancel();
                    }
                    log::debug!("start: Waiting for heartbeater to finish...");
                    if let Err(e) = heartbeater.await {
                        log::warn!("start: Heartbeater failed to finish: {e:?}");
                    }
                    sender_arc.write().unwrap().take();
                    log::info!("WebSocket connection closed");
                }
                Err(err) => {
                    if let Error::Http(response) = err {
                        if response.status() == StatusCode::UNAUTHORIZED {
                            log::error!("Unauthorized websocket connection");
                            return Err(ConnectWsError::Unauthorized);
                        }
                        log::error!(
                            "Websocket connection failed with status {}",
                            response.status()
                        );
                    } else {
                        log::error!("Failed to connect to websocket server: {err:?}");
                    }
                }
            }

            #[allow(clippy::redundant_pub_crate)]
            {
                select!(
                    () = sleep(self.reconnect_delay) => {}
                    () = cancellation_token.cancelled() => {
                        log::debug!("Cancelling retry");
                        break;
                    }
                );
            }
            just_retried = true;
        }

        log::debug!("Subscription client closed");

        Ok(())
    }
}

/// Processes one inbound text frame.
///
/// Success frames dispatch through the registry; error frames are surfaced
/// and close the connection for good.
fn handle_frame(
    registry: &RwLock<SubscriptionRegistry>,
    text: &str,
    on_error: Option<&ErrorHandler>,
    cancellation_token: &CancellationToken,
) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Success {
            payload: Some(payload),
            ..
        }) => match serde_json::from_value::<ResourceEvent>(payload) {
            Ok(event) => dispatch::dispatch_event(registry, &event),
            Err(e) => log::warn!("Ignoring malformed event payload: {e:?}"),
        },
        Ok(InboundMessage::Success {
            payload: None,
            message,
        }) => {
            log::trace!("Acknowledgement from server: {message}");
        }
        Ok(InboundMessage::Error { message }) => {
            log::error!("Subscription error from server: {message}");
            if let Some(on_error) = on_error {
                on_error(&message);
            }
            cancellation_token.cancel();
        }
        Err(e) => log::warn!("Ignoring unparseable frame: {e:?}"),
    }
}
