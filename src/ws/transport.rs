//! A single WebSocket transport.
//!
//! Each transport is a spawned task owning one `tokio-tungstenite` stream. It
//! reports what happens on the wire to an [`EventSink`] (the connection
//! manager) and accepts outgoing frames and close requests over an unbounded
//! command channel, held by the [`TransportHandle`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};

use super::error::WsError;
use crate::store::{Frame, ReadyState};

/// Receiver of transport events. Events of one transport arrive in order.
pub(crate) trait EventSink: Send + Sync + 'static {
    fn on_open(&self, id: u64, protocol: Option<String>);

    fn on_message(&self, id: u64, frame: Frame);

    fn on_error(&self, id: u64, error: &WsError);

    /// `clean` is true when the closing handshake completed.
    fn on_close(&self, id: u64, clean: bool);
}

pub(crate) enum Command {
    Send(Message),
    Close { code: u16, reason: String },
}

/// Read-only view of the live transport, returned by
/// [`Client::get_socket`](crate::Client::get_socket).
#[derive(Clone)]
pub struct TransportHandle {
    id: u64,
    url: String,
    protocol: Option<String>,
    state: Arc<watch::Sender<ReadyState>>,
    command_tx: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("protocol", &self.protocol)
            .field("ready_state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

impl TransportHandle {
    pub(crate) fn new(
        id: u64,
        url: String,
        protocol: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ReadyState::Connecting);

        let handle = Self {
            id,
            url,
            protocol,
            state: Arc::new(state),
            command_tx,
        };
        (handle, command_rx)
    }

    /// Identifier unique within one connection manager.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Subprotocol requested in the handshake.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Phase of this transport. Unlike the snapshot, this moves to
    /// `Closing` as soon as a close is requested.
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Subscribe to phase changes of this transport.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ReadyState> {
        self.state.subscribe()
    }

    pub(crate) fn send(&self, message: Message) {
        if self.command_tx.send(Command::Send(message)).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = self.id, "Transport task is gone, dropping message");
        }
    }

    pub(crate) fn close(&self, code: u16, reason: String) {
        self.state.send_replace(ReadyState::Closing);
        if self.command_tx.send(Command::Close { code, reason }).is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!(id = self.id, "Transport task is gone, nothing to close");
        }
    }

    /// Drives the transport until it closes, reporting every event to `sink`.
    pub(crate) async fn run<S: EventSink>(
        &self,
        sink: S,
        request: Request,
        connect_timeout: Duration,
        mut command_rx: mpsc::UnboundedReceiver<Command>,
    ) {
        let id = self.id;

        let ws_stream = match timeout(connect_timeout, connect_async(request)).await {
            Ok(Ok((ws_stream, response))) => {
                let protocol = response
                    .headers()
                    .get(SEC_WEBSOCKET_PROTOCOL)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_owned);

                #[cfg(feature = "tracing")]
                tracing::debug!(id, url = %self.url, status = %response.status(), "Connected");

                // A close requested during the handshake keeps the transport in `Closing`.
                let opened = self.state.send_if_modified(|state| {
                    let connecting = *state == ReadyState::Connecting;
                    if connecting {
                        *state = ReadyState::Open;
                    }
                    connecting
                });
                if opened {
                    sink.on_open(id, protocol);
                }
                ws_stream
            }
            Ok(Err(e)) => {
                self.fail(&sink, &WsError::Connection(e));
                return;
            }
            Err(_elapsed) => {
                self.fail(&sink, &WsError::Timeout(connect_timeout));
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let mut close_received = false;

        let clean = loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(id, %text, "Received WebSocket text message");
                            sink.on_message(id, Frame::Text(text.as_str().to_owned()));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(id, len = bytes.len(), "Received WebSocket binary message");
                            sink.on_message(id, Frame::Binary(bytes.to_vec()));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            #[cfg(feature = "tracing")]
                            tracing::debug!(id, ?frame, "Received close frame");
                            #[cfg(not(feature = "tracing"))]
                            let _: &Option<CloseFrame> = &frame;
                            // tungstenite answers the close frame on the next read.
                            close_received = true;
                            self.state.send_replace(ReadyState::Closing);
                        }
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite.
                        }
                        Some(Err(TungsteniteError::ConnectionClosed)) | None => break close_received,
                        Some(Err(e)) => {
                            let error = WsError::Connection(e);
                            #[cfg(feature = "tracing")]
                            tracing::warn!(id, %error, "Transport failed");
                            sink.on_error(id, &error);
                            break false;
                        }
                    }
                }

                Some(command) = command_rx.recv() => {
                    let message = match command {
                        Command::Send(message) => message,
                        Command::Close { code, reason } => Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })),
                    };
                    if let Err(e) = write.send(message).await {
                        let error = WsError::Connection(e);
                        #[cfg(feature = "tracing")]
                        tracing::warn!(id, %error, "Failed to write to transport");
                        sink.on_error(id, &error);
                        break false;
                    }
                }
            }
        };

        self.state.send_replace(ReadyState::Closed);
        #[cfg(feature = "tracing")]
        tracing::debug!(id, clean, "Transport closed");
        sink.on_close(id, clean);
    }

    fn fail<S: EventSink>(&self, sink: &S, error: &WsError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(id = self.id, url = %self.url, %error, "Unable to connect");

        self.state.send_replace(ReadyState::Closed);
        sink.on_error(self.id, error);
        sink.on_close(self.id, false);
    }
}
