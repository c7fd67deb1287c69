//! Core traits for decoding incoming frames.

use serde::de::DeserializeOwned;

use super::error::WsError;
use crate::store::{Frame, Payload};

/// Message parser trait for converting incoming frames into snapshot payloads.
///
/// This abstracts the two payload modes:
/// - [`JsonParser`]: every frame is decoded as JSON into `M`
/// - [`RawParser`]: frames are stored untouched
///
/// # Example
///
/// ```ignore
/// pub struct LineParser;
///
/// impl MessageParser<String> for LineParser {
///     fn parse(&self, frame: Frame) -> sockety::Result<Payload<String>> {
///         match frame {
///             Frame::Text(text) => Ok(Payload::Json(text.lines().next().unwrap_or_default().to_owned())),
///             other => Ok(Payload::Raw(other)),
///         }
///     }
/// }
/// ```
pub trait MessageParser<M>: Send + Sync + 'static {
    /// Parse one incoming frame.
    fn parse(&self, frame: Frame) -> crate::Result<Payload<M>>;
}

/// Decodes text and binary frames as JSON.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl<M: DeserializeOwned> MessageParser<M> for JsonParser {
    fn parse(&self, frame: Frame) -> crate::Result<Payload<M>> {
        let message = match &frame {
            Frame::Text(text) => serde_json::from_str(text),
            Frame::Binary(bytes) => serde_json::from_slice(bytes),
        }
        .map_err(WsError::MessageParse)?;

        Ok(Payload::Json(message))
    }
}

/// Passes frames through unmodified.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawParser;

impl<M> MessageParser<M> for RawParser {
    fn parse(&self, frame: Frame) -> crate::Result<Payload<M>> {
        Ok(Payload::Raw(frame))
    }
}
