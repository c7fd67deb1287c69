#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_util::sync::CancellationToken;

use super::config::{CloseOptions, Config, Hook};
use super::error::WsError;
use super::traits::{JsonParser, MessageParser, RawParser};
use super::transport::{EventSink, TransportHandle};
use crate::Result;
use crate::error::Error;
use crate::store::{ErrorInfo, Frame, Patch, ReadyState, Store};

/// Mutable connection bookkeeping, guarded by a single lock that is never held
/// while the store notifies or a hook runs.
#[derive(Default)]
struct Link {
    url: String,
    after_connect: Option<Hook>,
    transport: Option<TransportHandle>,
    next_id: u64,
    attempts_remaining: u32,
    reconnect: Option<CancellationToken>,
    /// Set by `close`/`shutdown`; a close that follows never reconnects.
    closing_manually: bool,
}

impl Link {
    fn is_current(&self, id: u64) -> bool {
        self.transport.as_ref().is_some_and(|t| t.id() == id)
    }

    fn open_transport(&self) -> Option<&TransportHandle> {
        self.transport
            .as_ref()
            .filter(|t| t.ready_state() == ReadyState::Open)
    }

    fn cancel_reconnect(&mut self) {
        if let Some(token) = self.reconnect.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Cancelling pending reconnect");
            token.cancel();
        }
    }
}

/// What to do after the transport reported a close.
enum AfterClose {
    /// Clean or manual close.
    Clear,
    Retry(CancellationToken),
    Exhausted,
}

struct Inner<T> {
    store: Store<T>,
    config: Config,
    parser: Box<dyn MessageParser<T>>,
    link: Mutex<Link>,
}

/// Owns the transport and runs the connection state machine.
///
/// Every observed transition is pushed into the [`Store`]:
///
/// ```text
/// Closed ──connect──▶ Connecting ──handshake──▶ Open
///   ▲                     │                      │
///   │                     ▼                      ▼
///   └──clean/exhausted── Closing ◀───────────────┘
///                         │
///                         └──unclean, attempts left──▶ Connecting (after the interval)
/// ```
///
/// Reconnects use a fixed interval and are bounded by
/// [`Config::reconnect_attempts`]; the budget is restored whenever a
/// connection reaches `Open`. The pending reconnect timer is owned here and
/// cancelled on `Open`, on manual [`close`](Self::close), on a fresh
/// [`connect`](Self::connect) and on [`shutdown`](Self::shutdown).
///
/// Methods that start a transport spawn Tokio tasks and must be called from
/// within a Tokio runtime.
pub struct ConnectionManager<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link = self.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &link.url)
            .field("transport", &link.transport)
            .field("attempts_remaining", &link.attempts_remaining)
            .field("reconnecting", &link.reconnect.is_some())
            .finish_non_exhaustive()
    }
}

impl<T> ConnectionManager<T> {
    /// Create a manager that decodes frames according to `config.raw_payload`.
    #[must_use]
    pub fn new(store: Store<T>, config: Config) -> Self
    where
        T: DeserializeOwned,
    {
        let parser: Box<dyn MessageParser<T>> = if config.raw_payload {
            Box::new(RawParser)
        } else {
            Box::new(JsonParser)
        };
        Self::with_parser(store, config, parser)
    }

    /// Create a manager with a custom [`MessageParser`]; `config.raw_payload`
    /// is ignored.
    #[must_use]
    pub fn with_parser(store: Store<T>, config: Config, parser: Box<dyn MessageParser<T>>) -> Self {
        let link = Link {
            attempts_remaining: config.reconnect_attempts,
            ..Link::default()
        };

        Self {
            inner: Arc::new(Inner {
                store,
                config,
                parser,
                link: Mutex::new(link),
            }),
        }
    }

    /// Open a connection to `url`. Does nothing while a transport exists.
    pub fn connect(&self, url: &str)
    where
        T: Send + Sync + 'static,
    {
        self.start(url, None);
    }

    /// Like [`connect`](Self::connect), remembering `after_connect` to be
    /// called every time a connection (or reconnection) reaches `Open`.
    pub fn connect_with(&self, url: &str, after_connect: Hook)
    where
        T: Send + Sync + 'static,
    {
        self.start(url, Some(after_connect));
    }

    fn start(&self, url: &str, after_connect: Option<Hook>)
    where
        T: Send + Sync + 'static,
    {
        {
            let mut link = self.lock();
            if link.transport.is_some() {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %link.url, "Already connected, ignoring connect");
                return;
            }
            url.clone_into(&mut link.url);
            if after_connect.is_some() {
                link.after_connect = after_connect;
            }
            link.closing_manually = false;
            link.cancel_reconnect();
        }
        self.open();
    }

    /// Create a transport for the recorded URL and spawn it.
    fn open(&self)
    where
        T: Send + Sync + 'static,
    {
        let (handle, request, command_rx) = {
            let mut link = self.lock();
            if link.transport.is_some() {
                return;
            }

            let request = match self.request(&link.url) {
                Ok(request) => request,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "Not connecting");
                    #[cfg(not(feature = "tracing"))]
                    let _: &Error = &e;
                    return;
                }
            };

            link.next_id += 1;
            let (handle, command_rx) = TransportHandle::new(
                link.next_id,
                link.url.clone(),
                self.inner.config.protocol.clone(),
            );
            link.transport = Some(handle.clone());
            (handle, request, command_rx)
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(id = handle.id(), url = %handle.url(), "Connecting");

        self.inner.store.set_state(
            Patch::new()
                .ready_state(ReadyState::Connecting)
                .url(handle.url().to_owned()),
        );

        let sink = self.clone();
        let connect_timeout = self.inner.config.connect_timeout;
        tokio::spawn(async move {
            handle
                .run(sink, request, connect_timeout, command_rx)
                .await;
        });
    }

    fn request(&self, url: &str) -> Result<Request> {
        if url.is_empty() {
            return Err(Error::validation("WebSocket url is empty"));
        }

        let mut request = url
            .into_client_request()
            .map_err(|e| WsError::InvalidRequest(e.to_string()))?;

        if let Some(protocol) = &self.inner.config.protocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| WsError::InvalidRequest(format!("{protocol:?}: {e}")))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        Ok(request)
    }

    /// Arm the reconnect timer. When it fires, `on_reconnect` runs and a new
    /// transport is opened, unless the timer was cancelled in the meantime.
    fn schedule_reconnect(&self, token: CancellationToken)
    where
        T: Send + Sync + 'static,
    {
        let manager = self.clone();
        let interval = self.inner.config.reconnect_interval;

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }

            {
                let mut link = manager.lock();
                if token.is_cancelled() {
                    return;
                }
                link.reconnect = None;
            }

            if let Some(on_reconnect) = &manager.inner.config.on_reconnect {
                on_reconnect();
            }
            manager.open();
        });
    }

    /// JSON-encode `payload` and send it as a text frame.
    ///
    /// Silently dropped when no transport is open; only a serialization
    /// failure is reported.
    pub fn send<R: Serialize + ?Sized>(&self, payload: &R) -> Result<()> {
        let Some(transport) = self.lock().open_transport().cloned() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("No open transport, dropping message");
            return Ok(());
        };

        let json = serde_json::to_string(payload)?;
        transport.send(Message::Text(json.into()));
        Ok(())
    }

    /// Send `frame` verbatim. Silently dropped when no transport is open.
    pub fn send_raw<F: Into<Frame>>(&self, frame: F) {
        let Some(transport) = self.lock().open_transport().cloned() else {
            #[cfg(feature = "tracing")]
            tracing::debug!("No open transport, dropping raw message");
            return;
        };

        let message = match frame.into() {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };
        transport.send(message);
    }

    /// Close with code 1000. Does nothing unless the transport is `Open`.
    pub fn close(&self) {
        self.close_with(CloseOptions::default());
    }

    /// Request an orderly close. Does nothing unless the transport is `Open`.
    ///
    /// A pending reconnect is cancelled and the close that follows never
    /// triggers a reconnect.
    pub fn close_with(&self, options: CloseOptions) {
        let transport = {
            let mut link = self.lock();
            let Some(transport) = link.open_transport().cloned() else {
                #[cfg(feature = "tracing")]
                tracing::debug!("No open transport, ignoring close");
                return;
            };
            link.cancel_reconnect();
            link.closing_manually = true;
            transport
        };

        if let Some(before_close) = options.before_close {
            before_close();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(id = transport.id(), code = options.code, "Closing");
        transport.close(options.code, options.reason.unwrap_or_default());
    }

    /// Stop everything: cancel a pending reconnect and close the transport in
    /// whatever state it is, without reconnecting afterwards.
    pub fn shutdown(&self) {
        let transport = {
            let mut link = self.lock();
            link.cancel_reconnect();
            link.closing_manually = true;
            link.transport.clone()
        };

        if let Some(transport) = transport {
            transport.close(super::config::NORMAL_CLOSURE, String::new());
        }
    }

    /// The live transport, if any.
    #[must_use]
    pub fn get_socket(&self) -> Option<TransportHandle> {
        self.lock().transport.clone()
    }

    /// Reconnect attempts left before the manager gives up.
    #[must_use]
    pub fn attempts_remaining(&self) -> u32 {
        self.lock().attempts_remaining
    }

    /// Whether a reconnect timer is armed.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.lock().reconnect.is_some()
    }

    #[must_use]
    pub fn store(&self) -> &Store<T> {
        &self.inner.store
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        // Every update to `Link` is a plain field assignment, so a poisoned lock is still consistent.
        self.inner
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> EventSink for ConnectionManager<T>
where
    T: Send + Sync + 'static,
{
    fn on_open(&self, id: u64, protocol: Option<String>) {
        let after_connect = {
            let mut link = self.lock();
            if !link.is_current(id) || link.closing_manually {
                return;
            }
            link.attempts_remaining = self.inner.config.reconnect_attempts;
            link.cancel_reconnect();
            link.after_connect.clone()
        };

        self.inner.store.set_state(
            Patch::new()
                .ready_state(ReadyState::Open)
                .clear_error()
                .protocol(protocol),
        );

        if let Some(after_connect) = after_connect {
            after_connect();
        }
    }

    fn on_message(&self, id: u64, frame: Frame) {
        if !self.lock().is_current(id) {
            return;
        }

        match self.inner.parser.parse(frame) {
            Ok(payload) => self.inner.store.set_state(Patch::new().data(payload)),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(id, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &e;
            }
        }
    }

    fn on_error(&self, id: u64, error: &WsError) {
        if !self.lock().is_current(id) {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::error!(id, %error, "WebSocket error");

        self.inner
            .store
            .set_state(Patch::new().error(ErrorInfo::new(error.to_string())));
    }

    fn on_close(&self, id: u64, clean: bool) {
        if !self.lock().is_current(id) {
            return;
        }

        // The transport is still held here: `connect` from a listener is a no-op.
        self.inner
            .store
            .set_state(Patch::new().ready_state(ReadyState::Closing));

        let next = {
            let mut link = self.lock();
            if !link.is_current(id) {
                return;
            }
            link.transport = None;
            let manual = std::mem::take(&mut link.closing_manually);

            if clean || manual {
                AfterClose::Clear
            } else if link.attempts_remaining > 0 {
                link.attempts_remaining -= 1;
                let token = CancellationToken::new();
                link.reconnect = Some(token.clone());
                AfterClose::Retry(token)
            } else {
                AfterClose::Exhausted
            }
        };

        match next {
            AfterClose::Clear => self.inner.store.clear_store(),
            AfterClose::Retry(token) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    id,
                    attempts_remaining = self.attempts_remaining(),
                    interval = ?self.inner.config.reconnect_interval,
                    "Connection lost, scheduling reconnect"
                );
                self.schedule_reconnect(token);
            }
            AfterClose::Exhausted => {
                #[cfg(feature = "tracing")]
                tracing::error!(id, "Failed to reconnect, giving up");
                self.inner.store.clear_store();
            }
        }
    }
}
