use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::store::{Binding, Frame, Snapshot, Store, Unsubscribe};
use crate::ws::config::{CloseOptions, Config, Hook};
use crate::ws::{ConnectionManager, MessageParser, TransportHandle};

/// Reactive client for one persistent WebSocket connection.
///
/// The client pairs a [`Store`] with a [`ConnectionManager`]: connection
/// methods drive the socket, and everything the socket does is observed
/// through the store, either by polling [`get_state`](Self::get_state) or by
/// subscribing. No method reports connection failures; they show up as
/// [`Snapshot::ready_state`] transitions and [`Snapshot::error`].
///
/// Dropping the client cancels a pending reconnect and closes the socket.
///
/// # Examples
///
/// ```rust, no_run
/// use serde::Deserialize;
/// use serde_json::json;
/// use sockety::Client;
///
/// #[derive(Debug, PartialEq, Deserialize)]
/// struct Reply {
///     command: String,
///     message: String,
/// }
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client: Client<Reply> = Client::default();
///
///     let _unsubscribe = client.subscribe_with_selector(
///         |state| state.ready_state,
///         |now, before| println!("{before} -> {now}"),
///     );
///
///     client.connect("ws://localhost:8080");
///     // ... once Open:
///     client.send(&json!({ "command": "req-text", "message": "Hello World" }))?;
///
///     Ok(())
/// }
/// ```
pub struct Client<T> {
    store: Store<T>,
    connection: ConnectionManager<T>,
}

impl<T> Default for Client<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl<T> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("store", &self.store)
            .field("connection", &self.connection)
            .finish()
    }
}

impl<T> Client<T>
where
    T: Send + Sync + 'static,
{
    /// Create a disconnected client.
    #[must_use]
    pub fn new(config: Config) -> Self
    where
        T: DeserializeOwned,
    {
        let store = Store::new();
        let connection = ConnectionManager::new(store.clone(), config);
        Self { store, connection }
    }

    /// Create a disconnected client that decodes frames with `parser`.
    #[must_use]
    pub fn with_parser(config: Config, parser: Box<dyn MessageParser<T>>) -> Self {
        let store = Store::new();
        let connection = ConnectionManager::with_parser(store.clone(), config, parser);
        Self { store, connection }
    }

    /// Open a connection to `url`; no-op while a socket exists. An empty or
    /// malformed URL is logged and leaves the state untouched.
    pub fn connect(&self, url: &str) {
        self.connection.connect(url);
    }

    /// Like [`connect`](Self::connect), calling `after_connect` whenever the
    /// connection reaches `Open`, including after a reconnect.
    pub fn connect_with(&self, url: &str, after_connect: Hook) {
        self.connection.connect_with(url, after_connect);
    }

    /// Send `payload` as a JSON text frame, or drop it when not `Open`.
    ///
    /// # Errors
    ///
    /// Returns an error if `payload` cannot be serialized.
    pub fn send<R: Serialize + ?Sized>(&self, payload: &R) -> Result<()> {
        self.connection.send(payload)
    }

    /// Send `frame` unmodified, or drop it when not `Open`.
    pub fn send_raw<F: Into<Frame>>(&self, frame: F) {
        self.connection.send_raw(frame);
    }

    /// Close the socket with code 1000; no-op unless `Open`.
    pub fn close(&self) {
        self.connection.close();
    }

    pub fn close_with(&self, options: CloseOptions) {
        self.connection.close_with(options);
    }

    #[must_use]
    pub fn get_socket(&self) -> Option<TransportHandle> {
        self.connection.get_socket()
    }

    #[must_use]
    pub fn get_state(&self) -> Arc<Snapshot<T>> {
        self.store.get_state()
    }

    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    /// Evaluate `selector` against the current snapshot.
    pub fn select<R, S>(&self, selector: S) -> R
    where
        S: FnOnce(&Snapshot<T>) -> R,
    {
        self.store.select(selector)
    }

    /// See [`Store::bind`].
    pub fn bind<R, S>(&self, selector: S) -> Binding<T, R>
    where
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
    {
        self.store.bind(selector)
    }

    /// See [`Store::subscribe_with_selector`].
    pub fn subscribe_with_selector<R, S, C>(&self, selector: S, on_change: C) -> Unsubscribe
    where
        R: PartialEq + Clone + Send + 'static,
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
        C: Fn(&R, &R) + Send + Sync + 'static,
    {
        self.store.subscribe_with_selector(selector, on_change)
    }

    /// See [`Store::subscribe_with_selector_by`].
    pub fn subscribe_with_selector_by<R, S, E, C>(
        &self,
        selector: S,
        eq: E,
        on_change: C,
    ) -> Unsubscribe
    where
        R: Clone + Send + 'static,
        S: Fn(&Snapshot<T>) -> R + Send + Sync + 'static,
        E: Fn(&R, &R) -> bool + Send + Sync + 'static,
        C: Fn(&R, &R) + Send + Sync + 'static,
    {
        self.store.subscribe_with_selector_by(selector, eq, on_change)
    }

    #[must_use]
    pub fn store(&self) -> &Store<T> {
        &self.store
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }
}

impl<T> Drop for Client<T> {
    fn drop(&mut self) {
        self.connection.shutdown();
    }
}
