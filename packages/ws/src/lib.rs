//! WebSocket client for ModelBoard live-resource views.
//!
//! This crate provides the subscription layer the dashboard's live views sit
//! on: one multiplexed connection carrying per-resource subscriptions, plus
//! dedicated watch connections for the Kubernetes resource views.
//!
//! # Features
//!
//! * Automatic reconnection with a fixed delay on transport failures
//! * Subscription registry replayed on every reconnect so server-side state
//!   matches client-side intent
//! * Per-resource event dispatch by resource type and uid
//! * Application-level heartbeat frames on a fixed cadence while open
//! * Graceful self-close that suppresses reconnection
//!
//! # Examples
//!
//! ```rust,no_run
//! # use modelboard_models::ResourceType;
//! # use modelboard_ws::SubscriptionClient;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, handle) =
//!     SubscriptionClient::new("ws://localhost:7777/ws/v1/subscription/resource".to_string());
//!
//! // Start the websocket connection
//! tokio::spawn(async move { client.start().await });
//!
//! // Receive live updates for two deployments
//! let id = handle.subscribe(
//!     ResourceType::Deployment,
//!     vec!["dep-1".to_string(), "dep-2".to_string()],
//!     |payload| println!("deployment updated: {payload}"),
//! )?;
//!
//! // ...later, on view teardown
//! handle.unsubscribe(id)?;
//! handle.close();
//! # Ok(())
//! # }
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

pub mod client;
pub mod dispatch;
pub mod models;
pub mod registry;
pub mod urls;
pub mod watch;

pub use client::{
    ConnectWsError, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECONNECT_DELAY, ErrorHandler,
    SubscriptionClient, SubscriptionHandle, SubscriptionSender, WebsocketSendError,
};
pub use registry::{ResourceCallback, SubscriptionId, SubscriptionRegistry};
pub use watch::{ResourceWatcher, WatchHandle};
