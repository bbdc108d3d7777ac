//! The connection kernel: the single task that drives the rumqttc event loop.
//!
//! ```text
//! MqttLink (connect / publish / subscribe / disconnect)
//!     │ commands            ▲ LinkEvent
//!     ▼                     │
//! ConnectionKernel ── polls ──> rumqttc EventLoop ──> broker
//! ```
//!
//! The kernel does not retry on its own. It only polls the network while a
//! connection attempt or an established connection exists; after a failure it
//! goes idle and reports the failure, leaving the retry decision to whoever
//! owns the session. A new attempt starts when [`LinkCommand::Connect`]
//! arrives.

use std::ops::ControlFlow;

use rumqttc::{ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    event::{classify_connection_error, root_cause, LinkEvent},
    message::InboundMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkCommand {
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
}

pub struct ConnectionKernel {
    event_loop: EventLoop,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
    phase: Phase,
}

impl ConnectionKernel {
    pub(crate) fn new(
        event_loop: EventLoop,
        commands: mpsc::UnboundedReceiver<LinkCommand>,
        events: mpsc::UnboundedSender<LinkEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            event_loop,
            commands,
            events,
            cancel,
            phase: Phase::Idle,
        }
    }

    /// Runs until cancelled, until every link handle is dropped, or until a
    /// client-initiated DISCONNECT has been written to the socket.
    pub async fn run(mut self) {
        debug!("Connection kernel started");
        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Connection kernel cancelled");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(LinkCommand::Connect) => self.begin_attempt(),
                    None => {
                        debug!("All link handles dropped");
                        break;
                    }
                },

                polled = self.event_loop.poll(), if self.phase != Phase::Idle => {
                    if self.handle_poll(polled).is_break() {
                        break;
                    }
                }
            }
        }
        info!("Connection kernel stopped");
    }

    fn begin_attempt(&mut self) {
        if self.phase == Phase::Idle {
            debug!("Starting connection attempt");
            self.phase = Phase::Connecting;
        } else {
            trace!("Connect requested while {:?}, ignoring", self.phase);
        }
    }

    fn handle_poll(&mut self, polled: Result<Event, ConnectionError>) -> ControlFlow<()> {
        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    info!("Connection established");
                    self.phase = Phase::Connected;
                    self.emit(LinkEvent::Connected);
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("Received publish on topic {}", publish.topic);
                self.emit(LinkEvent::Message(InboundMessage::new(
                    publish.topic.clone(),
                    publish.payload.to_vec(),
                )));
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                // The socket error that follows reports the loss.
                warn!("Disconnect packet received from broker");
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("Disconnect sent to broker");
                self.phase = Phase::Idle;
                return ControlFlow::Break(());
            }
            Ok(event) => trace!("MQTT event: {:?}", event),
            Err(e) => self.handle_error(e),
        }
        ControlFlow::Continue(())
    }

    fn handle_error(&mut self, err: ConnectionError) {
        let reason = root_cause(&err);
        match self.phase {
            Phase::Connected => {
                self.phase = Phase::Idle;
                self.emit(LinkEvent::Disconnected { reason });
            }
            Phase::Connecting => {
                let disposition = classify_connection_error(&err);
                debug!("Connection attempt failed: {err:?}");
                self.phase = Phase::Idle;
                self.emit(LinkEvent::ConnectFailed {
                    reason,
                    disposition,
                });
            }
            Phase::Idle => trace!("Ignoring error while idle: {reason}"),
        }
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            trace!("Link event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{client::ClientBuilder, event::Disposition, testing::FakeBroker};

    struct Harness {
        commands: mpsc::UnboundedSender<LinkCommand>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
        _client: rumqttc::AsyncClient,
    }

    fn spawn_kernel(port: u16) -> Harness {
        let (client, event_loop) = ClientBuilder::new("kernel-test", "127.0.0.1", port, 10)
            .keep_alive(30)
            .build()
            .unwrap();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let kernel = ConnectionKernel::new(event_loop, cmd_rx, ev_tx, cancel.clone());
        Harness {
            commands: cmd_tx,
            events: ev_rx,
            cancel,
            task: tokio::spawn(kernel.run()),
            _client: client,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> LinkEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for link event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn idle_kernel_does_not_connect() {
        let broker = FakeBroker::start(0, true).await;
        let mut harness = spawn_kernel(broker.port);

        let nothing = tokio::time::timeout(Duration::from_millis(200), harness.events.recv()).await;
        assert!(nothing.is_err());
        assert!(!broker.was_contacted());

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn refused_tcp_connection_is_retryable_failure() {
        let port = crate::testing::unused_port().await;
        let mut harness = spawn_kernel(port);

        harness.commands.send(LinkCommand::Connect).unwrap();
        match next_event(&mut harness.events).await {
            LinkEvent::ConnectFailed { disposition, .. } => {
                assert_eq!(disposition, Disposition::Retry)
            }
            other => panic!("unexpected event {other}"),
        }

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn not_authorized_connack_is_fatal() {
        let broker = FakeBroker::start(5, false).await;
        let mut harness = spawn_kernel(broker.port);

        harness.commands.send(LinkCommand::Connect).unwrap();
        match next_event(&mut harness.events).await {
            LinkEvent::ConnectFailed { disposition, .. } => {
                assert_eq!(disposition, Disposition::AuthRejected)
            }
            other => panic!("unexpected event {other}"),
        }

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn broker_hangup_after_connack_reports_disconnect() {
        let broker = FakeBroker::start(0, false).await;
        let mut harness = spawn_kernel(broker.port);

        harness.commands.send(LinkCommand::Connect).unwrap();
        assert_eq!(next_event(&mut harness.events).await, LinkEvent::Connected);
        assert!(matches!(
            next_event(&mut harness.events).await,
            LinkEvent::Disconnected { .. }
        ));

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_command_sender_stops_kernel() {
        let port = crate::testing::unused_port().await;
        let harness = spawn_kernel(port);
        drop(harness.commands);
        tokio::time::timeout(Duration::from_secs(2), harness.task)
            .await
            .expect("kernel did not stop")
            .unwrap();
    }
}
