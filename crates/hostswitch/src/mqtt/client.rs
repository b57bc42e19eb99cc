use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::MqttOptions;
use rumqttc::Outgoing;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::TransportError;

/// MQTT message received from a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// What [`MqttClient::poll_message`] yields
#[derive(Debug, Clone, PartialEq)]
pub enum MqttEvent {
    /// A publish on one of our subscriptions
    Message(MqttMessage),

    /// The connection was re-established after a drop. Without
    /// `session_present` the broker has forgotten our subscriptions.
    Reconnected { session_present: bool },
}

/// Trait for MQTT client operations
///
/// This trait allows for mocking the MQTT client for testing purposes.
/// Publishes and subscriptions are requested at QoS 1; none of the methods
/// wait for the broker to acknowledge.
#[async_trait]
pub trait MqttClient: Send {
    /// Connect to the MQTT broker
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Publish a message to an MQTT topic
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError>;

    /// Wait for the next message or reconnect
    ///
    /// Returns None once the connection has been torn down
    async fn poll_message(&mut self) -> Option<MqttEvent>;

    /// Disconnect from the broker and stop background processing
    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// One recorded call on [`MockMqttClient`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Subscribe(String),
    Publish {
        topic: String,
        payload: String,
        retain: bool,
    },
}

/// Mock MQTT client for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    pub messages: std::collections::VecDeque<MqttEvent>,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>, bool)>,
    /// Subscribes and publishes in the order they were issued
    pub calls: Vec<MockCall>,
    pub is_connected: bool,
    pub fail_publish: bool,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.is_connected = true;
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.push(topic.to_string());
        self.calls.push(MockCall::Subscribe(topic.to_string()));
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.fail_publish {
            return Err(TransportError::NotConnected);
        }
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        self.calls.push(MockCall::Publish {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttEvent> {
        self.messages.pop_front()
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.is_connected = false;
        Ok(())
    }
}

#[cfg(test)]
impl MockMqttClient {
    /// Create a new mock MQTT client
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for poll_message()
    pub fn add_message(&mut self, topic: &str, payload: &str) {
        self.messages.push_back(MqttEvent::Message(MqttMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
            retain: false,
        }));
    }

    /// Queue a reconnect event for poll_message()
    pub fn add_reconnect(&mut self, session_present: bool) {
        self.messages
            .push_back(MqttEvent::Reconnected { session_present });
    }

    /// Published messages on `topic`, payload decoded as UTF-8
    pub fn published_to(&self, topic: &str) -> Vec<(String, bool)> {
        self.published
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, p, r)| (String::from_utf8_lossy(p).into_owned(), *r))
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.published.clear();
        self.calls.clear();
    }
}

/// Real MQTT client implementation using rumqttc
pub struct RumqttcClient {
    /// MQTT connection options (stored for lazy initialization)
    mqtt_options: MqttOptions,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Message receiver (created in connect())
    message_rx: Option<mpsc::UnboundedReceiver<MqttEvent>>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    /// Create a new RumqttcClient from configuration
    pub fn new(config: &MqttConfig) -> Self {
        let mut mqtt_options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);

        mqtt_options.set_keep_alive(Duration::from_secs(30));

        // Keep subscriptions on the broker across reconnects
        mqtt_options.set_clean_session(false);

        mqtt_options.set_credentials(config.username.clone(), config.password.clone());

        Self {
            mqtt_options,
            client: None,
            message_rx: None,
            event_loop_task: None,
        }
    }

    fn client(&self) -> Result<&AsyncClient, TransportError> {
        self.client.as_ref().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        // Create client and event loop
        let (client, mut event_loop) = AsyncClient::new(self.mqtt_options.clone(), 10);

        // Create channel for messages
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        // Spawn background task to poll event loop
        let task = tokio::spawn(async move {
            let mut connected_once = false;
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                            retain: publish.retain,
                        };

                        // Send to channel; if receiver dropped, exit
                        if message_tx.send(MqttEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        tracing::info!(
                            "Connected to MQTT broker ({:?}, session present: {})",
                            ack.code,
                            ack.session_present
                        );
                        let reconnected = MqttEvent::Reconnected {
                            session_present: ack.session_present,
                        };
                        if connected_once && message_tx.send(reconnected).is_err() {
                            break;
                        }
                        connected_once = true;
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        tracing::debug!("MQTT disconnect sent");
                        break;
                    }
                    Ok(_) => {
                        // Ignore other events (suback, puback, pings, etc.)
                    }
                    Err(e) => {
                        tracing::warn!("MQTT event loop error: {}", e);
                        // Sleep briefly before retrying
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            tracing::info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.message_rx = Some(message_rx);
        self.event_loop_task = Some(task);

        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.client()?.subscribe(topic, QoS::AtLeastOnce).await?;
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .await?;
        Ok(())
    }

    async fn poll_message(&mut self) -> Option<MqttEvent> {
        match &mut self.message_rx {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let client = match self.client.take() {
            Some(client) => client,
            None => return Ok(()),
        };
        client.disconnect().await?;

        // Give the event loop a moment to flush the DISCONNECT packet
        if let Some(task) = self.event_loop_task.take() {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                tracing::warn!("MQTT event loop did not stop in time");
            }
        }
        self.message_rx = None;
        Ok(())
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}
