#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;

/// Callback invoked around lifecycle events (`after_connect`, `before_close`,
/// `on_reconnect`).
pub type Hook = Arc<dyn Fn() + Send + Sync>;

const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
const DEFAULT_CONNECT_TIMEOUT_DURATION: Duration = Duration::from_secs(10);

/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Configuration for a [`Client`](crate::Client).
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use sockety::ws::config::Config;
///
/// let config = Config::builder()
///     .protocol("chat")
///     .reconnect_interval(Duration::from_millis(500))
///     .reconnect_attempts(5)
///     .on_reconnect(Arc::new(|| {}))
///     .build();
///
/// assert_eq!(config.reconnect_attempts, 5);
/// ```
#[non_exhaustive]
#[derive(Clone, Builder)]
pub struct Config {
    /// Subprotocol requested in the handshake.
    #[builder(into)]
    pub protocol: Option<String>,
    /// Keep incoming frames untouched instead of decoding them as JSON.
    #[builder(default)]
    pub raw_payload: bool,
    /// Fixed delay before each reconnect attempt after an unclean close.
    #[builder(default = DEFAULT_RECONNECT_INTERVAL_DURATION)]
    pub reconnect_interval: Duration,
    /// Number of reconnect attempts allowed before settling in `Closed`.
    /// Restored whenever a connection reaches `Open`.
    #[builder(default = DEFAULT_RECONNECT_ATTEMPTS)]
    pub reconnect_attempts: u32,
    /// Maximum time for the opening handshake.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT_DURATION)]
    pub connect_timeout: Duration,
    /// Called right before every reconnect attempt.
    pub on_reconnect: Option<Hook>,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("protocol", &self.protocol)
            .field("raw_payload", &self.raw_payload)
            .field("reconnect_interval", &self.reconnect_interval)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("connect_timeout", &self.connect_timeout)
            .field("on_reconnect", &self.on_reconnect.is_some())
            .finish()
    }
}

/// Options for [`Client::close_with`](crate::Client::close_with).
#[non_exhaustive]
#[derive(Clone, Builder)]
pub struct CloseOptions {
    #[builder(default = NORMAL_CLOSURE)]
    pub code: u16,
    #[builder(into)]
    pub reason: Option<String>,
    /// Called after the close was accepted and before the close frame is sent.
    pub before_close: Option<Hook>,
}

impl Default for CloseOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for CloseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloseOptions")
            .field("code", &self.code)
            .field("reason", &self.reason)
            .field("before_close", &self.before_close.is_some())
            .finish()
    }
}
