use std::future::Future;

use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::error::Result;
use crate::mqtt::MqttClient;
use crate::mqtt::MqttEvent;
use crate::mqtt::MqttMessage;
use crate::registry::Dispatched;
use crate::registry::Registry;

/// Process-wide context: the single broker connection and the entity
/// registry it serves.
///
/// Inbound messages are handled one at a time on the task that drives
/// [`Bridge::run`], so entity state needs no locking.
pub struct Bridge<C: MqttClient> {
    client: C,
    registry: Registry,
}

impl<C: MqttClient> Bridge<C> {
    pub fn new(client: C, registry: Registry) -> Self {
        Self { client, registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Connect, listen for hub status and activate every entity
    pub async fn start(&mut self) -> Result<()> {
        self.client.connect().await?;
        self.subscribe_and_activate().await
    }

    async fn subscribe_and_activate(&mut self) -> Result<()> {
        let status_topic = self.registry.status_topic().to_string();
        info!("Subscribing to hub status topic {}", status_topic);
        self.client.subscribe(&status_topic).await?;

        self.registry.activate_all(&mut self.client).await?;
        info!("Activated {} entities", self.registry.len());
        Ok(())
    }

    /// Bring the broker back up to date after a reconnect.
    ///
    /// A kept session still holds our subscriptions, so announcing is
    /// enough. Otherwise every subscription is restored first.
    pub async fn handle_reconnect(&mut self, session_present: bool) {
        let result = if session_present {
            info!("Reconnected with existing session, re-announcing entities");
            self.registry.announce_all(&mut self.client).await
        } else {
            warn!("Reconnected without a session, restoring subscriptions");
            self.subscribe_and_activate().await
        };

        if let Err(e) = result {
            error!("Failed to restore state after reconnect: {}", e);
        }
    }

    /// Route one inbound message, logging anything that goes wrong
    pub async fn handle_message(&mut self, msg: MqttMessage) {
        let payload = match std::str::from_utf8(&msg.payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping non UTF-8 payload on {}: {}", msg.topic, e);
                return;
            }
        };

        debug!("Received message on topic: {}", msg.topic);

        match self
            .registry
            .dispatch(&msg.topic, payload, &mut self.client)
            .await
        {
            Ok(Dispatched::Entity(prefix)) => debug!("Command handled by {}", prefix),
            Ok(Dispatched::HubOnline) | Ok(Dispatched::HubStatus(_)) => {}
            Err(e) => error!("Failed to handle message on {}: {}", msg.topic, e),
        }
    }

    /// Process messages until `shutdown` resolves or the connection closes,
    /// then disconnect.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal");
                    break;
                }
                event = self.client.poll_message() => match event {
                    Some(MqttEvent::Message(msg)) => self.handle_message(msg).await,
                    Some(MqttEvent::Reconnected { session_present }) => {
                        self.handle_reconnect(session_present).await
                    }
                    None => {
                        warn!("MQTT message stream closed");
                        break;
                    }
                },
            }
        }

        self.stop().await
    }

    /// Disconnect from the broker. No entity teardown is published.
    pub async fn stop(&mut self) -> Result<()> {
        info!("Disconnecting from MQTT broker");
        self.client.disconnect().await?;
        Ok(())
    }
}
