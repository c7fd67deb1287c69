#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde::Deserialize;
use serde_json::{Value, json};
use sockety::{Client, Snapshot};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Interval, sleep, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const PROGRESS_TOTAL: u64 = 100;
const PROGRESS_STEP: u64 = 10;
const WAIT: Duration = Duration::from_secs(5);

/// Envelope used by every fixture reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reply {
    pub command: String,
    pub message: Value,
}

impl Reply {
    /// `message.current` of a `res-progress` reply.
    pub fn current(&self) -> Option<u64> {
        self.message.get("current").and_then(Value::as_u64)
    }
}

#[derive(Debug, Clone)]
enum Control {
    /// Start the closing handshake from the server side.
    Close,
    /// Drop the TCP stream without a close frame.
    Abort,
}

/// Mock WebSocket server speaking the `req-text` / `req-progress` protocol.
///
/// - `{"command":"req-text","message":"Hello World"}` is answered with
///   `{"command":"res-text","message":"hello-:-world"}`
/// - `{"command":"req-progress"}` streams `res-progress` frames with `current`
///   going from 0 to 100 in steps of 10
/// - any other JSON command is answered with `"nganu"`
/// - non-JSON text and binary frames are echoed back unchanged
///
/// A requested subprotocol is accepted as is.
pub struct FixtureServer {
    addr: SocketAddr,
    control_tx: broadcast::Sender<Control>,
    received_rx: mpsc::UnboundedReceiver<Message>,
    connections: Arc<AtomicUsize>,
}

impl FixtureServer {
    /// Start a fixture server on a random port, streaming progress every second.
    pub async fn start() -> Self {
        Self::start_with(Duration::from_secs(1)).await
    }

    /// Start a fixture server with a custom progress cadence.
    pub async fn start_with(progress_interval: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (control_tx, _) = broadcast::channel::<Control>(16);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<Message>();
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_control = control_tx.clone();
        let accepted = Arc::clone(&connections);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, echo_protocol).await
                else {
                    continue;
                };

                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    ws_stream,
                    progress_interval,
                    accept_control.subscribe(),
                    received_tx.clone(),
                ));
            }
        });

        Self {
            addr,
            control_tx,
            received_rx,
            connections,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of completed handshakes so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close every live connection with code 1000.
    pub fn close_all(&self) {
        drop(self.control_tx.send(Control::Close));
    }

    /// Drop every live connection without a closing handshake.
    pub fn abort_all(&self) {
        drop(self.control_tx.send(Control::Abort));
    }

    /// Next data frame received from any client.
    pub async fn recv(&mut self) -> Option<Message> {
        timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

#[expect(
    clippy::result_large_err,
    reason = "Signature is dictated by tungstenite's handshake callback"
)]
fn echo_protocol(request: &Request, mut response: Response) -> Result<Response, ErrorResponse> {
    if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
        response
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
    }
    Ok(response)
}

async fn serve(
    ws_stream: WebSocketStream<TcpStream>,
    progress_interval: Duration,
    mut control_rx: broadcast::Receiver<Control>,
    received_tx: mpsc::UnboundedSender<Message>,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut progress: Option<u64> = None;
    let mut ticker = tokio::time::interval(progress_interval);

    loop {
        tokio::select! {
            msg = read.next() => {
                let reply = match msg {
                    Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
                        drop(received_tx.send(message.clone()));
                        respond(message, &mut progress, &mut ticker)
                    }
                    // A close frame is answered by tungstenite on the next read.
                    Some(Ok(_)) => None,
                    _ => break,
                };

                if let Some(reply) = reply
                    && write.send(reply).await.is_err()
                {
                    break;
                }
            }

            _ = ticker.tick(), if progress.is_some() => {
                let Some(current) = progress else {
                    continue;
                };
                let frame = json!({
                    "command": "res-progress",
                    "message": { "current": current, "total": PROGRESS_TOTAL },
                });
                if write.send(Message::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
                progress = (current < PROGRESS_TOTAL).then_some(current + PROGRESS_STEP);
            }

            control = control_rx.recv() => {
                match control {
                    Ok(Control::Close) => {
                        let frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: Utf8Bytes::from_static("bye"),
                        };
                        if write.send(Message::Close(Some(frame))).await.is_err() {
                            break;
                        }
                    }
                    Ok(Control::Abort) | Err(_) => break,
                }
            }
        }
    }
}

fn respond(message: Message, progress: &mut Option<u64>, ticker: &mut Interval) -> Option<Message> {
    let request = match &message {
        Message::Text(text) => serde_json::from_str::<Value>(text.as_str()).ok(),
        _ => None,
    };
    let Some(request) = request else {
        return Some(message);
    };

    let reply = match request["command"].as_str() {
        Some("req-text") => json!({
            "command": "res-text",
            "message": request["message"]
                .as_str()
                .unwrap_or_default()
                .to_lowercase()
                .replace(' ', "-:-"),
        }),
        Some("req-progress") => {
            *progress = Some(0);
            ticker.reset_immediately();
            return None;
        }
        _ => json!({ "command": "res-text", "message": "nganu" }),
    };

    Some(Message::Text(reply.to_string().into()))
}

/// URL of a local port nobody listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);
    url
}

/// Install a test subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

/// Polls the client until its snapshot satisfies `predicate`.
pub async fn wait_for<T, P>(client: &Client<T>, predicate: P) -> Arc<Snapshot<T>>
where
    T: Send + Sync + 'static,
    P: Fn(&Snapshot<T>) -> bool,
{
    timeout(WAIT, async {
        loop {
            let state = client.get_state();
            if predicate(&state) {
                return state;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}
