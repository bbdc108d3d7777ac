//! Events emitted by the connection kernel and the classification of
//! connection failures.

use std::fmt;

use rumqttc::{ConnectReturnCode, ConnectionError};

use crate::message::InboundMessage;

/// What the owner of the session should do after a failed connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient: network trouble, broker unavailable, non-auth refusal.
    Retry,
    /// The broker rejected our credentials. Retrying cannot help.
    AuthRejected,
}

impl Disposition {
    pub fn is_fatal(self) -> bool {
        matches!(self, Disposition::AuthRejected)
    }
}

/// Protocol-level happenings translated for the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// CONNACK with a success code.
    Connected,
    /// A connection attempt did not reach CONNACK success.
    ConnectFailed {
        reason: String,
        disposition: Disposition,
    },
    /// An established connection was lost.
    Disconnected { reason: String },
    /// A publish arrived on a subscribed topic.
    Message(InboundMessage),
}

impl LinkEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkEvent::Connected => "Connected",
            LinkEvent::ConnectFailed { .. } => "ConnectFailed",
            LinkEvent::Disconnected { .. } => "Disconnected",
            LinkEvent::Message(_) => "Message",
        }
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Connected => write!(f, "Connected"),
            LinkEvent::ConnectFailed {
                reason,
                disposition,
            } => write!(f, "ConnectFailed ({reason}, {disposition:?})"),
            LinkEvent::Disconnected { reason } => write!(f, "Disconnected ({reason})"),
            LinkEvent::Message(msg) => write!(f, "Message on {}", msg.topic),
        }
    }
}

/// Only an authentication refusal stops the retry loop; everything else,
/// including non-auth refusals and TLS trouble, is retried.
pub fn classify_connection_error(err: &ConnectionError) -> Disposition {
    match err {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized,
        ) => Disposition::AuthRejected,
        _ => Disposition::Retry,
    }
}

/// Innermost message of an error chain, without surrounding quotes.
pub fn root_cause(e: &dyn std::error::Error) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string().trim_matches('"').to_string()
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn auth_refusals_are_fatal() {
        for code in [
            ConnectReturnCode::BadUserNamePassword,
            ConnectReturnCode::NotAuthorized,
        ] {
            let err = ConnectionError::ConnectionRefused(code);
            assert_eq!(classify_connection_error(&err), Disposition::AuthRejected);
            assert!(classify_connection_error(&err).is_fatal());
        }
    }

    #[test]
    fn other_refusals_are_retried() {
        for code in [
            ConnectReturnCode::ServiceUnavailable,
            ConnectReturnCode::BadClientId,
            ConnectReturnCode::RefusedProtocolVersion,
        ] {
            let err = ConnectionError::ConnectionRefused(code);
            assert_eq!(classify_connection_error(&err), Disposition::Retry);
        }
    }

    #[test]
    fn io_errors_are_retried() {
        let err = ConnectionError::Io(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(classify_connection_error(&err), Disposition::Retry);
        assert_eq!(
            classify_connection_error(&ConnectionError::NetworkTimeout),
            Disposition::Retry
        );
    }

    #[test]
    fn root_cause_walks_the_chain() {
        let err = ConnectionError::Io(io::Error::new(io::ErrorKind::Other, "\"boom\""));
        assert_eq!(root_cause(&err), "boom");
    }

    #[test]
    fn event_display() {
        let ev = LinkEvent::Disconnected {
            reason: "broker closed".into(),
        };
        assert_eq!(ev.to_string(), "Disconnected (broker closed)");
        assert_eq!(ev.as_str(), "Disconnected");
    }
}
