//! Construction of the rumqttc client and event loop.
//!
//! ```ignore
//! let (client, event_loop) = ClientBuilder::from_config(&config)?.build()?;
//! ```

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use tracing::debug;
use validator::Validate;

use crate::{
    config::{Config, TlsConfig},
    error::TransferError,
    message::LastWill,
};

/// Fluent builder producing an `AsyncClient` and its `EventLoop`.
///
/// The client is cheap to clone and may be used from any task. The event loop
/// must be driven by exactly one task, see
/// [`ConnectionKernel`](crate::connection::ConnectionKernel).
pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
    tls_config: Option<TlsConfig>,
}

impl ClientBuilder {
    /// Builder with protocol defaults. An empty `client_id` is replaced by a
    /// random UUID.
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16, cap: usize) -> Self {
        Self {
            opts: MqttOptions::new(resolve_client_id(client_id.into()), host, port),
            cap,
            tls_config: None,
        }
    }

    /// Validates `config` and applies every setting it carries.
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        config.validate()?;

        let options = &config.options;
        let mut builder = Self::new(
            config.client_id.clone(),
            config.host.clone(),
            config.port,
            options.request_channel_capacity,
        )
        .keep_alive(options.keep_alive)
        .clean_session(options.clean_session)
        .max_inflight(options.max_inflight);

        if let Some(size) = options.max_packet_size {
            builder = builder.max_packet_size(size as usize, size as usize);
        }
        if let Some(credentials) = &config.credentials {
            builder = builder.credentials(&credentials.username, &credentials.password);
        }
        if let Some(last_will) = &config.last_will {
            builder = builder.last_will(last_will)?;
        }
        if let Some(tls) = &options.tls {
            builder.tls_config = Some(tls.clone());
        }

        Ok(builder)
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn max_packet_size(mut self, incoming: usize, outgoing: usize) -> Self {
        self.opts.set_max_packet_size(incoming, outgoing);
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    /// Registers the message the broker publishes if we vanish without a
    /// clean DISCONNECT.
    pub fn last_will(mut self, last_will: &LastWill) -> Result<Self, TransferError> {
        let qos = last_will.endpoint.rumqttc_qos()?;
        self.opts.set_last_will(rumqttc::LastWill::new(
            last_will.endpoint.topic.clone(),
            last_will.payload.clone(),
            qos,
            last_will.endpoint.retain,
        ));
        Ok(self)
    }

    pub fn client_id(&self) -> String {
        self.opts.client_id()
    }

    fn build_tls_transport(tls_config: &TlsConfig) -> Result<Transport, TransferError> {
        tls_config
            .validate_config()
            .map_err(|e| TransferError::ClientSetup(format!("Invalid TLS configuration: {e}")))?;

        let ca_path = tls_config
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("CA certificate path is required".into()))?;
        let ca = fs::read(ca_path)?;

        let client_auth = match (&tls_config.client_cert_path, &tls_config.client_key_path) {
            (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
            _ => None,
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }))
    }

    pub fn build(self) -> Result<(AsyncClient, EventLoop), TransferError> {
        let mut opts = self.opts;
        if let Some(tls) = &self.tls_config {
            opts.set_transport(Self::build_tls_transport(tls)?);
            debug!("TLS transport configured");
        }

        Ok(AsyncClient::new(opts, self.cap))
    }
}

// rumqttc panics on an empty or space-prefixed id.
fn resolve_client_id(client_id: String) -> String {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        trimmed.to_string()
    }
}
