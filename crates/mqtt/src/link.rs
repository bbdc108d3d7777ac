//! The handle applications use to drive a broker connection.

use std::{future::Future, time::Duration};

use rumqttc::{AsyncClient, ClientError};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    client::ClientBuilder,
    config::Config,
    connection::{ConnectionKernel, LinkCommand},
    error::TransferError,
    event::LinkEvent,
    message::{qos_from_u8, EndpointMetadata},
};

/// Cloneable handle over the client and the connection kernel task.
#[derive(Clone)]
pub struct MqttLink {
    client: AsyncClient,
    commands: mpsc::UnboundedSender<LinkCommand>,
    cancel: CancellationToken,
    request_timeout: Duration,
}

/// Everything [`MqttLink::start`] hands back.
pub struct LinkParts {
    pub link: MqttLink,
    /// Protocol events, in the order the kernel observed them.
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
    /// Completes once the kernel has exited.
    pub kernel: JoinHandle<()>,
}

impl MqttLink {
    /// Builds the client from `config` and spawns the connection kernel. The
    /// kernel stays idle until [`MqttLink::connect`] is called.
    pub fn start(config: &Config) -> Result<LinkParts, TransferError> {
        let builder = ClientBuilder::from_config(config)?;
        let client_id = builder.client_id();
        let (client, event_loop) = builder.build()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let kernel = ConnectionKernel::new(event_loop, cmd_rx, ev_tx, cancel.clone());
        let kernel = tokio::spawn(kernel.run());
        info!(
            "MQTT link ready for {}:{} as '{}'",
            config.host, config.port, client_id
        );

        Ok(LinkParts {
            link: MqttLink {
                client,
                commands: cmd_tx,
                cancel,
                request_timeout: Duration::from_millis(config.options.request_timeout_ms),
            },
            events: ev_rx,
            kernel,
        })
    }

    /// Asks the kernel to start a connection attempt. The outcome arrives as
    /// a [`LinkEvent`].
    pub fn connect(&self) -> Result<(), TransferError> {
        self.commands
            .send(LinkCommand::Connect)
            .map_err(|_| TransferError::KernelStopped)
    }

    pub async fn publish(
        &self,
        endpoint: &EndpointMetadata,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), TransferError> {
        let qos = endpoint.rumqttc_qos()?;
        let request = self.client.publish(
            endpoint.topic.clone(),
            qos,
            endpoint.retain,
            payload.into(),
        );
        self.bounded(&endpoint.topic, request).await
    }

    pub async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransferError> {
        let qos = qos_from_u8(qos)?;
        let request = self.client.subscribe(topic, qos);
        self.bounded(topic, request).await
    }

    /// Queues a clean DISCONNECT. The kernel exits once it has been written,
    /// after every request queued before it.
    pub async fn disconnect(&self) -> Result<(), TransferError> {
        let request = self.client.disconnect();
        self.bounded("<disconnect>", request).await
    }

    /// Stops the kernel immediately, dropping anything still queued.
    pub fn close(&self) {
        debug!("Closing MQTT link");
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.commands.is_closed()
    }

    async fn bounded<F>(&self, topic: &str, request: F) -> Result<(), TransferError>
    where
        F: Future<Output = Result<(), ClientError>>,
    {
        if self.is_closed() {
            return Err(TransferError::KernelStopped);
        }
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransferError::RequestTimeout {
                topic: topic.to_string(),
                timeout_ms: self.request_timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::LastWill,
        testing::{contains, FakeBroker},
    };

    fn config_for(port: u16) -> Config {
        Config::new("127.0.0.1", port, "link-test")
            .with_credentials("user", "secret")
            .with_last_will(LastWill::new(
                EndpointMetadata::at_least_once("sys-qtt/sensor/host/availability", true),
                "offline",
            ))
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn publish_then_disconnect_reaches_broker_in_order() {
        let broker = FakeBroker::start(0, true).await;
        let LinkParts {
            link,
            mut events,
            kernel,
        } = MqttLink::start(&config_for(broker.port)).unwrap();

        link.connect().unwrap();
        assert_eq!(next_event(&mut events).await, LinkEvent::Connected);

        let endpoint = EndpointMetadata::at_least_once("sys-qtt/sensor/host/availability", true);
        link.publish(&endpoint, "online").await.unwrap();
        link.disconnect().await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), kernel)
            .await
            .expect("kernel did not exit after disconnect")
            .unwrap();

        let bytes = broker.received().await;
        assert_eq!(bytes[0] & 0xF0, 0x10, "first packet must be CONNECT");
        assert!(contains(&bytes, b"offline"), "last will payload missing");
        assert!(contains(&bytes, b"user"));
        assert!(contains(&bytes, b"online"));
        assert!(bytes.ends_with(&[0xE0, 0x00]), "DISCONNECT must come last");
    }

    #[tokio::test]
    async fn close_stops_kernel_and_rejects_requests() {
        let port = crate::testing::unused_port().await;
        let parts = MqttLink::start(&config_for(port)).unwrap();

        parts.link.close();
        tokio::time::timeout(Duration::from_secs(2), parts.kernel)
            .await
            .expect("kernel did not stop")
            .unwrap();

        assert!(parts.link.is_closed());
        let endpoint = EndpointMetadata::at_least_once("t", false);
        assert!(matches!(
            parts.link.publish(&endpoint, "x").await,
            Err(TransferError::KernelStopped)
        ));
        assert!(matches!(
            parts.link.connect(),
            Err(TransferError::KernelStopped)
        ));
    }

    #[tokio::test]
    async fn start_rejects_invalid_config() {
        let config = Config::new("", 1883, "id");
        assert!(matches!(
            MqttLink::start(&config),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn publish_rejects_bad_qos() {
        let port = crate::testing::unused_port().await;
        let parts = MqttLink::start(&config_for(port)).unwrap();
        let endpoint = EndpointMetadata::new("t", 9, false);
        assert!(matches!(
            parts.link.publish(&endpoint, "x").await,
            Err(TransferError::InvalidMetadata(_))
        ));
        parts.link.close();
    }
}
