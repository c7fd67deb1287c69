use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Connection phase, numbered like the WebSocket `readyState` constants.
#[non_exhaustive]
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize_repr,
    Deserialize_repr,
    strum_macros::Display,
)]
#[repr(u8)]
pub enum ReadyState {
    /// A transport has been created and the handshake is in flight.
    #[strum(serialize = "CONNECTING")]
    Connecting = 0,
    /// The handshake completed and frames can be exchanged.
    #[strum(serialize = "OPEN")]
    Open = 1,
    /// The transport went away; a reconnect may follow.
    #[strum(serialize = "CLOSING")]
    Closing = 2,
    /// No transport. Initial and terminal state.
    #[default]
    #[strum(serialize = "CLOSED")]
    Closed = 3,
}

/// An unparsed WebSocket data frame.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

/// The last message received on the connection.
///
/// JSON mode decodes every frame into [`Payload::Json`]; raw mode keeps the
/// frame untouched in [`Payload::Raw`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload<T> {
    Json(T),
    Raw(Frame),
}

impl<T> Payload<T> {
    /// Returns the decoded message, if this payload was parsed as JSON.
    #[must_use]
    pub const fn as_json(&self) -> Option<&T> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Returns the untouched frame, if this payload was received in raw mode.
    #[must_use]
    pub const fn as_raw(&self) -> Option<&Frame> {
        match self {
            Self::Json(_) => None,
            Self::Raw(frame) => Some(frame),
        }
    }
}

/// A received payload, shared by every snapshot taken until the next message.
///
/// Equality is identity: two `Data` are equal only when they come from the
/// same message. A selector on [`Snapshot::data`] therefore fires for every new
/// message, even one whose content repeats the previous message. Compare the
/// dereferenced [`Payload`]s for value equality.
pub struct Data<T>(Arc<Payload<T>>);

impl<T> Data<T> {
    #[must_use]
    pub fn new(payload: Payload<T>) -> Self {
        Self(Arc::new(payload))
    }

    #[must_use]
    pub fn payload(&self) -> &Payload<T> {
        &self.0
    }
}

impl<T> Clone for Data<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> Deref for Data<T> {
    type Target = Payload<T>;

    fn deref(&self) -> &Payload<T> {
        &self.0
    }
}

impl<T> PartialEq for Data<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Data<T> {}

impl<T: fmt::Debug> fmt::Debug for Data<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Description of a transport failure recorded into the snapshot.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    #[must_use]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Immutable view of the connection.
///
/// A new snapshot replaces the previous one on every change, so holding on to
/// an `Arc<Snapshot<T>>` never observes a later mutation.
#[non_exhaustive]
#[derive(Debug, PartialEq)]
pub struct Snapshot<T> {
    pub ready_state: ReadyState,
    pub data: Option<Data<T>>,
    pub error: Option<ErrorInfo>,
    /// URL of the current (or last attempted) transport.
    pub url: Option<String>,
    /// Subprotocol negotiated during the handshake.
    pub protocol: Option<String>,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            ready_state: ReadyState::Closed,
            data: None,
            error: None,
            url: None,
            protocol: None,
        }
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            ready_state: self.ready_state,
            data: self.data.clone(),
            error: self.error.clone(),
            url: self.url.clone(),
            protocol: self.protocol.clone(),
        }
    }
}

impl<T> Snapshot<T> {
    /// Shorthand for `ready_state == ReadyState::Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.ready_state == ReadyState::Open
    }

    /// Returns the last message if it was decoded as JSON.
    #[must_use]
    pub fn json(&self) -> Option<&T> {
        self.data.as_deref().and_then(Payload::as_json)
    }

    pub(crate) fn merged(&self, patch: Patch<T>) -> Self {
        let mut next = self.clone();
        if let Some(ready_state) = patch.ready_state {
            next.ready_state = ready_state;
        }
        if let Some(data) = patch.data {
            next.data = data;
        }
        if let Some(error) = patch.error {
            next.error = error;
        }
        if let Some(url) = patch.url {
            next.url = Some(url);
        }
        if let Some(protocol) = patch.protocol {
            next.protocol = protocol;
        }
        next
    }
}

/// A partial update merged into the current [`Snapshot`] by
/// [`Store::set_state`](super::Store::set_state).
///
/// Fields that are not set are left untouched.
#[must_use]
#[derive(Debug)]
pub struct Patch<T> {
    ready_state: Option<ReadyState>,
    data: Option<Option<Data<T>>>,
    error: Option<Option<ErrorInfo>>,
    url: Option<String>,
    protocol: Option<Option<String>>,
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Self {
            ready_state: None,
            data: None,
            error: None,
            url: None,
            protocol: None,
        }
    }
}

impl<T> Patch<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready_state(mut self, ready_state: ReadyState) -> Self {
        self.ready_state = Some(ready_state);
        self
    }

    pub fn data(mut self, payload: Payload<T>) -> Self {
        self.data = Some(Some(Data::new(payload)));
        self
    }

    pub fn clear_data(mut self) -> Self {
        self.data = Some(None);
        self
    }

    pub fn error(mut self, error: ErrorInfo) -> Self {
        self.error = Some(Some(error));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub(crate) fn url(mut self, url: String) -> Self {
        self.url = Some(url);
        self
    }

    pub(crate) fn protocol(mut self, protocol: Option<String>) -> Self {
        self.protocol = Some(protocol);
        self
    }
}
