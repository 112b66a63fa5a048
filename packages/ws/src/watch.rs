//! Dedicated live-resource watch connections.
//!
//! Each live view (cluster pods, deployment pods, helm chart release
//! resources) gets its own socket to a dedicated endpoint rather than going
//! through the multiplexed subscription registry. The watcher follows the
//! same contract as [`SubscriptionClient`](crate::client::SubscriptionClient):
//! heartbeats on a fixed cadence while open, fixed-delay reconnect on
//! transport failure, and a self-close on consumer teardown or an
//! application-level error frame.
//!
//! Payloads are delivered as raw [`Value`]s on a channel; the pod endpoints
//! deserialize into [`ApiPod`](modelboard_models::ApiPod) lists.

use std::time::Duration;

use futures_util::{StreamExt as _, future, pin_mut};
use serde_json::Value;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::time::sleep;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error, Message, http::StatusCode},
};
use tokio_util::sync::CancellationToken;

use crate::client::{ConnectWsError, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_DELAY};
use crate::models::{InboundMessage, OutboundMessage};

/// Handle to a watch connection that allows closing it.
#[derive(Clone)]
pub struct WatchHandle {
    cancellation_token: CancellationToken,
}

impl WatchHandle {
    /// Closes the watch connection.
    ///
    /// This is a self-close: the watcher will not reconnect afterwards.
    pub fn close(&self) {
        self.cancellation_token.cancel();
    }

    /// Whether the watch has been closed for good.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

/// A websocket client watching one dedicated live-resource endpoint.
#[derive(Clone)]
pub struct ResourceWatcher {
    url: String,
    cancellation_token: CancellationToken,
    heartbeat_interval: Duration,
    reconnect_delay: Duration,
}

impl ResourceWatcher {
    /// Creates a new watcher for the given endpoint URL.
    ///
    /// Returns a tuple containing the watcher and a handle to close the
    /// connection. See [`crate::urls`] for endpoint URL construction.
    #[must_use]
    pub fn new(url: String) -> (Self, WatchHandle) {
        let cancellation_token = CancellationToken::new();
        let handle = WatchHandle {
            cancellation_token: cancellation_token.clone(),
        };

        (
            Self {
                url,
                cancellation_token,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
                reconnect_delay: DEFAULT_RECONNECT_DELAY,
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

    /// Starts the watch connection with automatic reconnection on transport
    /// failure, delivering payloads to `tx`.
    ///
    /// Runs until the handle closes the connection, the receiving side of
    /// `tx` is dropped, or an application-level error frame arrives.
    ///
    /// # Errors
    ///
    /// * Returns [`ConnectWsError::Unauthorized`] if the websocket connection
    ///   is unauthorized
    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    pub async fn start(&self, tx: Sender<Value>) -> Result<(), ConnectWsError> {
        let url = self.url.clone();
        let cancellation_token = self.cancellation_token.clone();

        let mut just_retried = false;

        loop {
            let close_token = CancellationToken::new();

            let (txf, rxf) = futures_channel::mpsc::unbounded::<OutboundMessage>();

            log::debug!("Connecting to watch websocket '{url}'...");
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
                        let tx = tx.clone();

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
                                    handle_watch_frame(
                                        text.as_str(),
                                        &tx,
                                        &cancellation_token,
                                    )
                                    .await;
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

        log::debug!("Watch closed");

        Ok(())
    }
}

/// Processes one inbound text frame from a dedicated watch endpoint.
///
/// Payloads forward to the consumer channel; a dropped receiver counts as
/// consumer teardown and error frames close the watch for good.
async fn handle_watch_frame(text: &str, tx: &Sender<Value>, cancellation_token: &CancellationToken) {
    match serde_json::from_str::<InboundMessage>(text) {
        Ok(InboundMessage::Success {
            payload: Some(payload),
            ..
        }) => {
            if let Err(e) = tx.send(payload).await {
                log::debug!("Watch consumer dropped: {e:?}");
                cancellation_token.cancel();
            }
        }
        Ok(InboundMessage::Success {
            payload: None,
            message,
        }) => {
            log::trace!("Acknowledgement from server: {message}");
        }
        Ok(InboundMessage::Error { message }) => {
            log::error!("Watch error from server: {message}");
            cancellation_token.cancel();
        }
        Err(e) => log::warn!("Ignoring unparseable frame: {e:?}"),
    }
}
