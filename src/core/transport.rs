//! The seam between the session logic and the broker link.

use sysqtt_mqtt::{EndpointMetadata, MqttLink, TransferError};

/// What the controller and the engine need from a broker connection.
/// Connection outcomes are reported separately as `LinkEvent`s.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Requests a connection attempt without waiting for its outcome.
    fn connect(&self) -> Result<(), TransferError>;

    async fn publish(
        &self,
        endpoint: &EndpointMetadata,
        payload: Vec<u8>,
    ) -> Result<(), TransferError>;

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransferError>;

    /// Clean DISCONNECT after everything queued before it.
    async fn disconnect(&self) -> Result<(), TransferError>;

    /// Drops the connection immediately.
    fn close(&self);
}

#[async_trait::async_trait]
impl Transport for MqttLink {
    fn connect(&self) -> Result<(), TransferError> {
        MqttLink::connect(self)
    }

    async fn publish(
        &self,
        endpoint: &EndpointMetadata,
        payload: Vec<u8>,
    ) -> Result<(), TransferError> {
        MqttLink::publish(self, endpoint, payload).await
    }

    async fn subscribe(&self, topic: &str, qos: u8) -> Result<(), TransferError> {
        MqttLink::subscribe(self, topic, qos).await
    }

    async fn disconnect(&self) -> Result<(), TransferError> {
        MqttLink::disconnect(self).await
    }

    fn close(&self) {
        MqttLink::close(self)
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! A transport that records every call and replays scripted connection
    //! outcomes as link events.

    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicBool, Ordering},
            Mutex,
        },
    };

    use sysqtt_mqtt::LinkEvent;
    use tokio::sync::{mpsc, Notify};

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        Connect,
        Publish {
            topic: String,
            qos: u8,
            retain: bool,
            payload: String,
        },
        Subscribe(String),
        Disconnect,
        Close,
    }

    #[derive(Default)]
    pub struct RecordingTransport {
        calls: Mutex<Vec<Call>>,
        fail_publish: AtomicBool,
        failing_topics: Mutex<Vec<String>>,
        connect_script: Mutex<VecDeque<LinkEvent>>,
        events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
        activity: Notify,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Link events will be delivered through `tx`; each `connect()` pops
        /// the next scripted outcome.
        pub fn attach(&self, tx: mpsc::UnboundedSender<LinkEvent>) {
            *self.events.lock().unwrap() = Some(tx);
        }

        pub fn script_connect(&self, outcomes: impl IntoIterator<Item = LinkEvent>) {
            self.connect_script.lock().unwrap().extend(outcomes);
        }

        pub fn fail_publishes(&self, fail: bool) {
            self.fail_publish.store(fail, Ordering::SeqCst);
        }

        /// Only publishes to `topic` fail.
        pub fn fail_topic(&self, topic: impl Into<String>) {
            self.failing_topics.lock().unwrap().push(topic.into());
        }

        /// Sends `event` as if the kernel had observed it.
        pub fn emit(&self, event: LinkEvent) {
            if let Some(tx) = self.events.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }

        pub fn publishes_to(&self, topic: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Publish { topic: t, payload, .. } if t == topic => Some(payload),
                    _ => None,
                })
                .collect()
        }

        pub fn count(&self, wanted: &Call) -> usize {
            self.calls().iter().filter(|c| *c == wanted).count()
        }

        /// Waits until `done` holds for the recorded calls.
        pub async fn wait_for(&self, done: impl Fn(&[Call]) -> bool) {
            loop {
                let notified = self.activity.notified();
                if done(&self.calls()) {
                    return;
                }
                notified.await;
            }
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
            self.activity.notify_waiters();
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        fn connect(&self) -> Result<(), TransferError> {
            self.record(Call::Connect);
            let next = self.connect_script.lock().unwrap().pop_front();
            if let Some(event) = next {
                self.emit(event);
            }
            Ok(())
        }

        async fn publish(
            &self,
            endpoint: &EndpointMetadata,
            payload: Vec<u8>,
        ) -> Result<(), TransferError> {
            self.record(Call::Publish {
                topic: endpoint.topic.clone(),
                qos: endpoint.qos,
                retain: endpoint.retain,
                payload: String::from_utf8_lossy(&payload).into_owned(),
            });
            if self.fail_publish.load(Ordering::SeqCst)
                || self.failing_topics.lock().unwrap().contains(&endpoint.topic)
            {
                return Err(TransferError::KernelStopped);
            }
            Ok(())
        }

        async fn subscribe(&self, topic: &str, _qos: u8) -> Result<(), TransferError> {
            self.record(Call::Subscribe(topic.to_string()));
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransferError> {
            self.record(Call::Disconnect);
            Ok(())
        }

        fn close(&self) {
            self.record(Call::Close);
        }
    }
}
