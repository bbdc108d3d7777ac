//! Configuration structures for the broker link.
//!
//! [`TransportOptions`] holds the tunables a user may set in the `[transport]`
//! table of the configuration file. [`Config`] is assembled by the application
//! from the broker identity (host, port, credentials) plus those options, and
//! is validated before any client is built.
//!
//! ```toml
//! [transport]
//! keep_alive = 60
//! request_channel_capacity = 128
//!
//! [transport.tls]
//! ca_cert_path = "/etc/ssl/certs/ca-bundle.crt"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::message::LastWill;

/// Connection settings for a single broker.
#[derive(Debug, Clone, Validate)]
pub struct Config {
    /// Broker hostname or IP address.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// MQTT client identifier. An empty string is replaced by a random UUID
    /// when the client is built.
    #[validate(length(max = 128, message = "Client ID must not exceed 128 characters"))]
    pub client_id: String,

    /// Username and password sent in the CONNECT packet.
    pub credentials: Option<Credentials>,

    /// Message the broker publishes on our behalf if the link drops uncleanly.
    pub last_will: Option<LastWill>,

    #[validate(nested)]
    pub options: TransportOptions,
}

impl Config {
    pub fn new(host: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            credentials: None,
            last_will: None,
            options: TransportOptions::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_last_will(mut self, last_will: LastWill) -> Self {
        self.last_will = Some(last_will);
        self
    }

    pub fn with_options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// User-tunable transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TransportOptions {
    /// Keep-alive interval in seconds. The client pings the broker when idle
    /// for this long.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    pub clean_session: bool,

    /// Maximum number of unacknowledged QoS 1/2 publishes.
    #[validate(range(
        min = 1,
        max = 65535,
        message = "Max inflight must be between 1 and 65535"
    ))]
    pub max_inflight: u16,

    /// Maximum packet size in bytes, applied to both directions.
    #[validate(range(
        min = 64,
        max = 268435455,
        message = "Max packet size must be between 64 bytes and 256 MiB"
    ))]
    pub max_packet_size: Option<u32>,

    /// Capacity of the request queue between link handles and the connection
    /// kernel.
    #[validate(range(
        min = 1,
        max = 65535,
        message = "Request channel capacity must be between 1 and 65535"
    ))]
    pub request_channel_capacity: usize,

    /// How long a publish/subscribe may wait for room in the request queue
    /// before it fails.
    #[validate(range(
        min = 100,
        max = 600000,
        message = "Request timeout must be between 100 ms and 10 minutes"
    ))]
    pub request_timeout_ms: u64,

    #[validate(nested)]
    pub tls: Option<TlsConfig>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            keep_alive: 60,
            clean_session: true,
            max_inflight: 100,
            max_packet_size: None,
            request_channel_capacity: 128,
            request_timeout_ms: 5000,
            tls: None,
        }
    }
}

/// TLS settings. Only a CA certificate is required; client certificate and
/// key enable mutual TLS and must be given together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TlsConfig {
    #[validate(custom(
        function = "validate_file_exists",
        message = "CA certificate file does not exist"
    ))]
    pub ca_cert_path: Option<String>,

    #[validate(custom(
        function = "validate_file_exists",
        message = "Client certificate file does not exist"
    ))]
    pub client_cert_path: Option<String>,

    #[validate(custom(
        function = "validate_file_exists",
        message = "Client key file does not exist"
    ))]
    pub client_key_path: Option<String>,
}

impl TlsConfig {
    pub fn with_ca_only(ca_cert_path: impl Into<String>) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: None,
            client_key_path: None,
        }
    }

    pub fn with_client_auth(
        ca_cert_path: impl Into<String>,
        client_cert_path: impl Into<String>,
        client_key_path: impl Into<String>,
    ) -> Self {
        Self {
            ca_cert_path: Some(ca_cert_path.into()),
            client_cert_path: Some(client_cert_path.into()),
            client_key_path: Some(client_key_path.into()),
        }
    }

    pub fn has_client_auth(&self) -> bool {
        self.client_cert_path.is_some() && self.client_key_path.is_some()
    }

    /// Cross-field checks the derive cannot express.
    pub fn validate_config(&self) -> Result<(), ValidationError> {
        let Some(ca) = self.ca_cert_path.as_deref() else {
            return Err(ValidationError::new("missing_ca_cert")
                .with_message("CA certificate path is required".into()));
        };
        validate_file_exists(ca)?;

        match (&self.client_cert_path, &self.client_key_path) {
            (Some(cert), Some(key)) => {
                validate_file_exists(cert)?;
                validate_file_exists(key)?;
            }
            (None, None) => {}
            _ => {
                return Err(ValidationError::new("incomplete_client_auth").with_message(
                    "Both client certificate and key must be provided or neither".into(),
                ))
            }
        }
        Ok(())
    }
}

fn validate_file_exists(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(
            ValidationError::new("empty_path").with_message("File path cannot be empty".into())
        );
    }
    let path_obj = Path::new(path);
    if !path_obj.is_file() {
        return Err(ValidationError::new("file_not_found")
            .with_message(format!("File does not exist or is not a file: {path}").into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn default_options_are_valid() {
        let config = Config::new("localhost", 1883, "sysqtt");
        assert!(config.validate().is_ok());
        assert_eq!(config.options.keep_alive, 60);
        assert!(config.options.clean_session);
    }

    #[test]
    fn empty_host_is_rejected() {
        let config = Config::new("", 1883, "sysqtt");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Host"));
    }

    #[test]
    fn port_zero_is_rejected() {
        let config = Config::new("localhost", 0, "sysqtt");
        assert!(config.validate().is_err());
    }

    #[test]
    fn keep_alive_out_of_range_is_rejected() {
        let options = TransportOptions {
            keep_alive: 1,
            ..TransportOptions::default()
        };
        let config = Config::new("localhost", 1883, "sysqtt").with_options(options);
        assert!(config.validate().is_err());
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: TransportOptions = toml::from_str("keep_alive = 30").unwrap();
        assert_eq!(options.keep_alive, 30);
        assert_eq!(options.request_channel_capacity, 128);
        assert!(options.tls.is_none());
    }

    #[test]
    fn tls_requires_ca() {
        let tls = TlsConfig::default();
        assert!(tls.validate_config().is_err());
    }

    #[test]
    fn tls_rejects_half_client_auth() {
        let dir = tempfile::tempdir().unwrap();
        let ca = dir.path().join("ca.crt");
        std::fs::File::create(&ca)
            .unwrap()
            .write_all(b"ca")
            .unwrap();

        let tls = TlsConfig {
            ca_cert_path: Some(ca.to_string_lossy().into_owned()),
            client_cert_path: Some(ca.to_string_lossy().into_owned()),
            client_key_path: None,
        };
        let err = tls.validate_config().unwrap_err();
        assert_eq!(err.code, "incomplete_client_auth");
    }

    #[test]
    fn tls_ca_only_with_existing_file_is_valid() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let tls = TlsConfig::with_ca_only(file.path().to_string_lossy());
        assert!(tls.validate_config().is_ok());
        assert!(!tls.has_client_auth());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let config = Config::new("localhost", 1883, "id").with_credentials("user", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}
