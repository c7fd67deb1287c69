//! Talks to a server speaking the `req-text` / `req-progress` protocol and logs
//! every state transition and message.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info,sockety=debug cargo run --example echo -- ws://localhost:8080
//! ```

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use sockety::ws::config::Config;
use sockety::{Client, ReadyState};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, PartialEq, Deserialize)]
struct Reply {
    command: String,
    message: Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://localhost:8080".to_owned());

    let client: Client<Reply> = Client::new(
        Config::builder()
            .reconnect_interval(Duration::from_secs(2))
            .on_reconnect(std::sync::Arc::new(|| warn!("reconnecting")))
            .build(),
    );

    let (state_tx, mut state_rx) = mpsc::unbounded_channel();
    let _states = client.subscribe_with_selector(
        |state| state.ready_state,
        move |now, before| {
            info!(from = %before, to = %now, "ready state changed");
            drop(state_tx.send(*now));
        },
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let _messages = client.subscribe_with_selector(
        |state| state.data.clone(),
        move |now, _before| {
            let Some(reply) = now.as_deref().and_then(|payload| payload.as_json()) else {
                return;
            };
            info!(command = %reply.command, message = %reply.message, "received");
            if reply.message.get("current") == Some(&json!(100)) {
                drop(done_tx.send(()));
            }
        },
    );

    client.connect(&url);
    loop {
        match timeout(Duration::from_secs(10), state_rx.recv()).await? {
            Some(ReadyState::Open) => break,
            Some(ReadyState::Closed) | None => anyhow::bail!("could not connect to {url}"),
            Some(_) => {}
        }
    }

    client.send(&json!({ "command": "req-text", "message": "Hello World" }))?;
    client.send(&json!({ "command": "req-progress" }))?;

    timeout(Duration::from_secs(30), done_rx.recv()).await?;
    client.close();
    timeout(Duration::from_secs(5), async {
        while let Some(state) = state_rx.recv().await {
            if state == ReadyState::Closed {
                break;
            }
        }
    })
    .await?;

    Ok(())
}
