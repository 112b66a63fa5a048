#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Basic usage example for `modelboard_ws`
//!
//! This example demonstrates the fundamental subscription flow:
//! - Starting an in-process demo server that emits deployment events
//! - Connecting the subscription client
//! - Subscribing to live updates for a deployment
//! - Unsubscribing and closing the connection

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use modelboard_models::ResourceType;
use modelboard_ws::SubscriptionClient;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize the logger to see debug output
    env_logger::init();

    println!("=== ModelBoard WebSocket Basic Usage Example ===\n");

    // Step 1: Start a tiny demo server that plays the platform's role
    println!("Step 1: Starting demo server...");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!(
        "ws://{}/ws/v1/subscription/resource",
        listener.local_addr()?
    );
    println!("Demo server listening at {url}\n");

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut socket) = accept_async(stream).await else {
            return;
        };

        // Wait for the client's subscribe frame, then emit a few events.
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                println!("[server] received: {text}");
                if text.contains("subscribe") {
                    break;
                }
            }
        }

        for status in ["deploying", "running"] {
            let event = json!({
                "type": "success",
                "message": "",
                "payload": {
                    "resource_type": "deployment",
                    "payload": { "uid": "dep-1", "name": "fraud-detector", "status": status }
                }
            });
            if socket.send(Message::Text(event.to_string().into())).await.is_err() {
                return;
            }
        }

        // Drain until the client goes away.
        while socket.next().await.is_some() {}
    });

    // Step 2: Create the subscription client
    println!("Step 2: Creating subscription client...");
    let (client, handle) = SubscriptionClient::new(url);
    tokio::spawn(async move { client.start().await });

    // Step 3: Subscribe to live updates for one deployment
    println!("Step 3: Subscribing to deployment 'dep-1'...");
    let id = handle.subscribe(
        ResourceType::Deployment,
        vec!["dep-1".to_string()],
        |payload| {
            println!(
                "Deployment update: {} is {}",
                payload["name"], payload["status"]
            );
        },
    )?;

    // Step 4: Let some events flow
    println!("Step 4: Waiting for events...\n");
    tokio::time::sleep(Duration::from_secs(1)).await;

    // Step 5: Tear down
    println!("\nStep 5: Unsubscribing and closing...");
    handle.unsubscribe(id)?;
    handle.close();

    println!("\n=== Example completed successfully! ===");

    Ok(())
}
