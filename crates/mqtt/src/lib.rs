//! Broker link for sysqtt, built on `rumqttc`.
//!
//! - [`ClientBuilder`]: turns a validated [`Config`] into a client and event loop
//! - [`ConnectionKernel`]: the task polling the event loop and reporting [`LinkEvent`]s
//! - [`MqttLink`]: cloneable handle to connect, publish, subscribe and disconnect
//! - [`Backoff`]: retry timing for connection attempts
//!
//! The crate knows nothing about sensors or discovery; it moves bytes and
//! reports what happened to the connection.

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod link;
pub mod message;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use client::ClientBuilder;
pub use config::{Config, Credentials, TlsConfig, TransportOptions};
pub use connection::ConnectionKernel;
pub use error::TransferError;
pub use event::{Disposition, LinkEvent};
pub use link::{LinkParts, MqttLink};
pub use message::{EndpointMetadata, InboundMessage, LastWill};
