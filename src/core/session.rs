//! Broker session controller.
//!
//! Owns the connection state machine and the broker-side lifecycle of the
//! device: discovery configs, availability and the clean goodbye on exit.
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──CONNACK──> Connected
//!      ▲                          │                       │
//!      └──── retry sleep ◄────────┘ (transient)           │ link lost
//!      └──────────────────────────────────────────────────┘
//! any state ──terminate()──> Terminating
//! ```
//!
//! Once the broker has accepted the connection the session counts as
//! connected even if the handshake that follows (subscribe, `online`,
//! discovery) fails. The unfinished part is retried every retry interval
//! until it succeeds or the link drops.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use sysqtt_mqtt::{
    Backoff, Disposition, EndpointMetadata, InboundMessage, LinkEvent, TransferError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    identity::{BrokerIdentity, Topics, OFFLINE, ONLINE},
    registry::SensorRegistry,
    state::{SessionState, SessionStateHandle},
    transport::Transport,
};

/// Errors that end the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Broker rejected the credentials of user '{user}': {reason}")]
    Auth { user: String, reason: String },

    #[error("The broker link stopped unexpectedly")]
    LinkClosed,
}

/// Outcome of one discovery burst.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub published: usize,
    /// Sensor ids whose config was not sent, with the reason.
    pub failed: Vec<(String, TransferError)>,
}

pub struct SessionController {
    registry: Arc<SensorRegistry>,
    state: SessionStateHandle,
    transport: Arc<dyn Transport>,
    identity: BrokerIdentity,
    topics: Topics,
    retry: Backoff,
    handshake_pending: AtomicBool,
    cancel: CancellationToken,
}

impl SessionController {
    pub fn new(
        registry: Arc<SensorRegistry>,
        state: SessionStateHandle,
        transport: Arc<dyn Transport>,
        identity: BrokerIdentity,
        topics: Topics,
        retry: Backoff,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            state,
            transport,
            identity,
            topics,
            retry,
            handshake_pending: AtomicBool::new(false),
            cancel,
        }
    }

    pub fn state(&self) -> &SessionStateHandle {
        &self.state
    }

    /// Starts a connection attempt. The outcome arrives as a link event.
    pub fn connect(&self) -> Result<(), SessionError> {
        if self.state.current().is_terminating() {
            return Ok(());
        }
        self.state.set(SessionState::Connecting);
        info!(
            "Connecting to {}:{} as '{}'",
            self.identity.host, self.identity.port, self.identity.client_id
        );
        self.transport
            .connect()
            .map_err(|_| SessionError::LinkClosed)
    }

    /// Connects and reacts to link events until cancelled. Returns an error
    /// only for an authentication refusal or a vanished link.
    pub async fn run(
        &self,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Result<(), SessionError> {
        self.connect()?;
        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                event = events.recv() => event,
                _ = tokio::time::sleep(self.retry.delay()), if self.handshake_pending() => {
                    self.resume_handshake().await;
                    continue;
                }
            };
            match event {
                Some(event) => self.handle(event).await?,
                None if self.cancel.is_cancelled() || self.state.current().is_terminating() => {
                    return Ok(())
                }
                None => return Err(SessionError::LinkClosed),
            }
        }
    }

    async fn handle(&self, event: LinkEvent) -> Result<(), SessionError> {
        debug!("Link event: {}", event.as_str());
        match event {
            LinkEvent::Connected => {
                self.on_connected().await;
                Ok(())
            }
            LinkEvent::ConnectFailed {
                reason,
                disposition,
            } => self.on_connect_failed(reason, disposition).await,
            LinkEvent::Disconnected { reason } => self.on_disconnected(&reason),
            LinkEvent::Message(message) => {
                self.on_message(&message).await;
                Ok(())
            }
        }
    }

    fn handshake_pending(&self) -> bool {
        self.handshake_pending.load(Ordering::SeqCst)
    }

    async fn on_connected(&self) {
        if self.state.current().is_terminating() {
            debug!("Connected while terminating, ignoring");
            return;
        }
        self.handshake_pending.store(false, Ordering::SeqCst);
        info!(
            "Connected to {}:{} as '{}'",
            self.identity.host, self.identity.port, self.identity.client_id
        );
        if let Err(e) = self.handshake().await {
            self.state.set(SessionState::Connected);
            self.handshake_pending.store(true, Ordering::SeqCst);
            warn!(
                "Connection handshake incomplete: {}. Retrying in {}s",
                e,
                self.retry.delay().as_secs_f64()
            );
        }
    }

    async fn resume_handshake(&self) {
        if !self.state.current().is_connected() {
            self.handshake_pending.store(false, Ordering::SeqCst);
            return;
        }
        debug!("Retrying the connection handshake");
        match self.handshake().await {
            Ok(()) => {
                self.handshake_pending.store(false, Ordering::SeqCst);
                info!("Connection handshake completed");
            }
            Err(e) => warn!(
                "Connection handshake incomplete: {}. Retrying in {}s",
                e,
                self.retry.delay().as_secs_f64()
            ),
        }
    }

    /// Subscribe, `online`, state goes to `Connected`, then the discovery
    /// burst and `online` again.
    async fn handshake(&self) -> Result<(), TransferError> {
        self.transport
            .subscribe(&self.topics.platform_status, 1)
            .await?;
        self.publish_availability(ONLINE).await?;
        self.state.set(SessionState::Connected);
        self.announce().await
    }

    /// Discovery burst followed by `online`. Fails with the first discovery
    /// error once the rest of the burst and `online` have been sent.
    async fn announce(&self) -> Result<(), TransferError> {
        let report = self.publish_discovery().await;
        info!(
            "Published {} discovery configs ({} failed)",
            report.published,
            report.failed.len()
        );
        self.publish_availability(ONLINE).await?;
        match report.failed.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Publishes every sensor's retained discovery config in registry order.
    /// A failed sensor does not hold back the ones after it.
    pub async fn publish_discovery(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for sensor in self.registry.iter() {
            let discovery = sensor.discovery();
            let endpoint = EndpointMetadata::at_least_once(discovery.topic.clone(), true);
            match self
                .transport
                .publish(&endpoint, discovery.payload.clone().into_bytes())
                .await
            {
                Ok(()) => report.published += 1,
                Err(e) => {
                    warn!("Discovery config for '{}' not published: {}", sensor.id(), e);
                    report.failed.push((sensor.id().to_string(), e));
                }
            }
        }
        report
    }

    async fn publish_availability(&self, status: &str) -> Result<(), TransferError> {
        self.transport
            .publish(&self.topics.availability_endpoint(), status.as_bytes().to_vec())
            .await
    }

    async fn on_connect_failed(
        &self,
        reason: String,
        disposition: Disposition,
    ) -> Result<(), SessionError> {
        if disposition.is_fatal() {
            error!(
                "Broker {}:{} rejected user '{}': {}",
                self.identity.host, self.identity.port, self.identity.username, reason
            );
            return Err(SessionError::Auth {
                user: self.identity.username.clone(),
                reason,
            });
        }
        if self.state.current().is_terminating() {
            return Ok(());
        }
        self.state.set(SessionState::Disconnected);

        let delay = self.retry.delay();
        warn!(
            "Connection to {}:{} failed: {}. Retrying in {}s",
            self.identity.host,
            self.identity.port,
            reason,
            delay.as_secs_f64()
        );
        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!("Retry cancelled");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }
        self.connect()
    }

    fn on_disconnected(&self, reason: &str) -> Result<(), SessionError> {
        if self.state.current().is_terminating() {
            debug!("Link closed during termination: {}", reason);
            return Ok(());
        }
        self.handshake_pending.store(false, Ordering::SeqCst);
        self.state.set(SessionState::Disconnected);
        warn!("Lost connection to broker: {}", reason);
        self.connect()
    }

    async fn on_message(&self, message: &InboundMessage) {
        if message.topic != self.topics.platform_status {
            debug!("Ignoring message on '{}'", message.topic);
            return;
        }
        let status = message.payload_str();
        if status.trim() != ONLINE {
            debug!("Platform status is '{}'", status.trim());
            return;
        }
        if !self.state.current().is_connected() {
            debug!(
                "Platform came online while {}, discovery follows the handshake",
                self.state.current()
            );
            return;
        }
        info!("Home Assistant is online, republishing discovery");
        if let Err(e) = self.announce().await {
            self.handshake_pending.store(true, Ordering::SeqCst);
            error!("Discovery republish failed: {}", e);
        }
    }

    /// Marks the session as terminating and says goodbye to the broker.
    /// Only the first call has any effect.
    pub async fn terminate(&self) {
        let previous = self.state.set(SessionState::Terminating);
        if previous.is_terminating() {
            return;
        }
        self.cancel.cancel();

        if previous.is_connected() {
            info!("Publishing offline and disconnecting");
            if let Err(e) = self.publish_availability(OFFLINE).await {
                warn!("Failed to publish offline status: {}", e);
            }
            if let Err(e) = self.transport.disconnect().await {
                warn!("Clean disconnect failed: {}", e);
                self.transport.close();
            }
        } else {
            debug!("Not connected ({}), closing the link", previous);
            self.transport.close();
        }
    }
}
