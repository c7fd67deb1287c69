#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub mod store;
pub mod ws;

pub use client::Client;
pub use error::Error;
pub use store::{
    Binding, Data, ErrorInfo, ExternalStore, Frame, Listener, Patch, Payload, ReadyState, Snapshot,
    Store, Unsubscribe,
};
pub use ws::config::{CloseOptions, Config};

pub type Result<T> = std::result::Result<T, Error>;
