//! Topic metadata and message types exchanged over the link.

use std::borrow::Cow;

use rumqttc::QoS;
use validator::Validate;

use crate::error::TransferError;

/// Where and how a message is published.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct EndpointMetadata {
    #[validate(length(min = 1, message = "Topic must not be empty"))]
    pub topic: String,

    #[validate(range(max = 2, message = "Invalid QoS value, must be 0, 1, or 2"))]
    pub qos: u8,

    pub retain: bool,
}

impl EndpointMetadata {
    pub fn new(topic: impl Into<String>, qos: u8, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            qos,
            retain,
        }
    }

    /// QoS 1 endpoint, the level every sysqtt topic uses.
    pub fn at_least_once(topic: impl Into<String>, retain: bool) -> Self {
        Self::new(topic, 1, retain)
    }

    pub fn rumqttc_qos(&self) -> Result<QoS, TransferError> {
        qos_from_u8(self.qos)
    }
}

pub(crate) fn qos_from_u8(qos: u8) -> Result<QoS, TransferError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "Invalid QoS value {other}, must be 0, 1, or 2"
        ))),
    }
}

/// Last will registered with the broker at connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub endpoint: EndpointMetadata,
    pub payload: Vec<u8>,
}

impl LastWill {
    pub fn new(endpoint: EndpointMetadata, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            endpoint,
            payload: payload.into(),
        }
    }
}

/// A publish received on one of our subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_mapping() {
        assert_eq!(qos_from_u8(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(2).unwrap(), QoS::ExactlyOnce);
        assert!(matches!(
            qos_from_u8(3),
            Err(TransferError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn endpoint_validation() {
        assert!(EndpointMetadata::at_least_once("a/b", true).validate().is_ok());
        assert!(EndpointMetadata::new("", 1, false).validate().is_err());
        assert!(EndpointMetadata::new("a/b", 5, false).validate().is_err());
    }

    #[test]
    fn inbound_payload_is_lossy_utf8() {
        let msg = InboundMessage::new("homeassistant/status", b"online".to_vec());
        assert_eq!(msg.payload_str(), "online");
    }
}
