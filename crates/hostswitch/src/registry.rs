use std::collections::HashMap;

use tracing::debug;
use tracing::info;

use crate::entity::Entity;
use crate::error::Error;
use crate::error::Result;
use crate::mqtt::discovery::strip_command_suffix;
use crate::mqtt::MqttClient;

/// Outcome of routing one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Delivered to the entity with this topic prefix
    Entity(String),
    /// The hub came online; every entity re-announced
    HubOnline,
    /// Some other hub status (e.g. "offline"); nothing to do
    HubStatus(String),
}

/// Directory of entities keyed by topic prefix
///
/// Built once at startup. Entities keep their insertion order so activation
/// and re-announcement walk them deterministically.
#[derive(Debug)]
pub struct Registry {
    entities: Vec<Entity>,
    by_prefix: HashMap<String, usize>,
    status_topic: String,
    birth_payload: String,
}

impl Registry {
    /// `status_topic`/`birth_payload` identify the hub's "online" notice
    pub fn new(status_topic: &str, birth_payload: &str) -> Self {
        Self {
            entities: Vec::new(),
            by_prefix: HashMap::new(),
            status_topic: status_topic.to_string(),
            birth_payload: birth_payload.to_string(),
        }
    }

    /// Add an entity. A prefix registered twice is a configuration bug.
    pub fn register(&mut self, entity: Entity) -> Result<()> {
        let prefix = entity.topic_prefix().to_string();
        if self.by_prefix.contains_key(&prefix) {
            return Err(Error::DuplicateEntity(prefix));
        }

        debug!("Registered entity {} under {}", entity.unique_id(), prefix);
        self.by_prefix.insert(prefix, self.entities.len());
        self.entities.push(entity);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, prefix: &str) -> Option<&Entity> {
        self.by_prefix.get(prefix).map(|&i| &self.entities[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter()
    }

    pub fn status_topic(&self) -> &str {
        &self.status_topic
    }

    /// Subscribe each entity's command topic, then announce it.
    ///
    /// Subscribing first means a command sent straight after discovery is
    /// never missed.
    pub async fn activate_all(&self, client: &mut dyn MqttClient) -> Result<()> {
        for entity in &self.entities {
            let command_topic = entity.command_topic();
            info!("Subscribing to {}", command_topic);
            client.subscribe(&command_topic).await?;
            entity.announce_discovery(client).await?;
        }
        Ok(())
    }

    /// Re-publish discovery and state for every entity
    pub async fn announce_all(&self, client: &mut dyn MqttClient) -> Result<()> {
        for entity in &self.entities {
            entity.announce_discovery(client).await?;
        }
        Ok(())
    }

    /// Route one inbound message.
    ///
    /// `{prefix}/set` goes to the entity registered under `{prefix}`. Otherwise
    /// the unstripped topic is compared against the hub status topic; the
    /// birth payload triggers a full re-announcement. Anything else is
    /// [`Error::UnroutableTopic`].
    pub async fn dispatch(
        &mut self,
        topic: &str,
        payload: &str,
        client: &mut dyn MqttClient,
    ) -> Result<Dispatched> {
        if let Some(&index) = strip_command_suffix(topic).and_then(|p| self.by_prefix.get(p)) {
            let entity = &mut self.entities[index];
            entity.handle_command(payload, client).await?;
            return Ok(Dispatched::Entity(entity.topic_prefix().to_string()));
        }

        if topic == self.status_topic {
            if payload == self.birth_payload {
                info!("Hub is online, re-announcing {} entities", self.entities.len());
                self.announce_all(client).await?;
                return Ok(Dispatched::HubOnline);
            }
            info!("Hub status changed to {:?}", payload);
            return Ok(Dispatched::HubStatus(payload.to_string()));
        }

        Err(Error::UnroutableTopic(topic.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::actions::Action;
    use crate::actions::MockActionProvider;
    use crate::entity::tests::device;
    use crate::entity::tests::display_entity;
    use crate::entity::Display;
    use crate::entity::SwitchState;
    use crate::mqtt::client::MockCall;
    use crate::mqtt::client::MockMqttClient;

    const STATUS: &str = "homeassistant/status";

    fn entity(object_id: &str, actions: Arc<MockActionProvider>) -> Entity {
        Entity::new(
            "homeassistant",
            &device(),
            object_id,
            object_id,
            Box::new(Display::new(actions)),
        )
        .with_state(SwitchState::Off)
    }

    fn registry_of(n: usize) -> (Registry, Vec<Arc<MockActionProvider>>) {
        let mut registry = Registry::new(STATUS, "online");
        let mut providers = Vec::new();
        for i in 0..n {
            let actions = Arc::new(MockActionProvider::new());
            registry
                .register(entity(&format!("switch_{}", i), actions.clone()))
                .unwrap();
            providers.push(actions);
        }
        (registry, providers)
    }

    #[test]
    fn test_register_and_lookup() {
        let (registry, _) = registry_of(2);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
        assert!(registry
            .get("homeassistant/switch/puffer/switch_1")
            .is_some());
        assert!(registry.get("homeassistant/switch/puffer/other").is_none());
        assert_eq!(registry.status_topic(), STATUS);
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let mut registry = Registry::new(STATUS, "online");
        let actions = Arc::new(MockActionProvider::new());
        registry.register(display_entity(actions.clone())).unwrap();

        let err = registry.register(display_entity(actions)).unwrap_err();
        assert!(matches!(
            err,
            Error::DuplicateEntity(ref p) if p == "homeassistant/switch/puffer/display"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_activate_all_ordering() {
        let (registry, _) = registry_of(3);
        let mut client = MockMqttClient::new();

        registry.activate_all(&mut client).await.unwrap();

        assert_eq!(client.subscriptions.len(), 3);
        assert_eq!(client.calls.len(), 9);
        for (i, chunk) in client.calls.chunks(3).enumerate() {
            let prefix = format!("homeassistant/switch/puffer/switch_{}", i);
            assert_eq!(chunk[0], MockCall::Subscribe(format!("{}/set", prefix)));
            match &chunk[1] {
                MockCall::Publish { topic, retain, .. } => {
                    assert_eq!(topic, &format!("{}/config", prefix));
                    assert!(!retain);
                }
                other => panic!("expected discovery publish, got {other:?}"),
            }
            assert_eq!(
                chunk[2],
                MockCall::Publish {
                    topic: format!("{}/state", prefix),
                    payload: "OFF".to_string(),
                    retain: true,
                }
            );
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_to_owner_only() {
        let (mut registry, providers) = registry_of(2);
        let mut client = MockMqttClient::new();

        let routed = registry
            .dispatch("homeassistant/switch/puffer/switch_1/set", "ON", &mut client)
            .await
            .unwrap();

        assert_eq!(
            routed,
            Dispatched::Entity("homeassistant/switch/puffer/switch_1".to_string())
        );
        assert!(providers[0].performed().is_empty());
        assert_eq!(providers[1].performed(), vec![Action::WakeDisplay]);
        assert_eq!(
            registry
                .get("homeassistant/switch/puffer/switch_0")
                .unwrap()
                .state(),
            SwitchState::Off
        );
        assert_eq!(
            registry
                .get("homeassistant/switch/puffer/switch_1")
                .unwrap()
                .state(),
            SwitchState::On
        );
        assert_eq!(
            client.published_to("homeassistant/switch/puffer/switch_1/state"),
            vec![("ON".to_string(), true)]
        );
        assert_eq!(client.published.len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_hub_online_reannounces_once_each() {
        for n in [0, 1, 4] {
            let (mut registry, _) = registry_of(n);
            let mut client = MockMqttClient::new();

            let routed = registry.dispatch(STATUS, "online", &mut client).await.unwrap();

            assert_eq!(routed, Dispatched::HubOnline);
            assert!(client.subscriptions.is_empty());
            for i in 0..n {
                let prefix = format!("homeassistant/switch/puffer/switch_{}", i);
                assert_eq!(client.published_to(&format!("{}/config", prefix)).len(), 1);
                assert_eq!(client.published_to(&format!("{}/state", prefix)).len(), 1);
            }
            assert_eq!(client.published.len(), 2 * n);
        }
    }

    #[tokio::test]
    async fn test_dispatch_hub_offline_is_ignored() {
        let (mut registry, _) = registry_of(2);
        let mut client = MockMqttClient::new();

        let routed = registry.dispatch(STATUS, "offline", &mut client).await.unwrap();

        assert_eq!(routed, Dispatched::HubStatus("offline".to_string()));
        assert!(client.published.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unroutable_topic() {
        let (mut registry, providers) = registry_of(1);
        let mut client = MockMqttClient::new();

        for topic in [
            "homeassistant/switch/puffer/unknown/set",
            "homeassistant/switch/puffer/switch_0/state",
            "homeassistant/switch/puffer/switch_0",
            "homeassistant/status/set",
        ] {
            let err = registry.dispatch(topic, "ON", &mut client).await.unwrap_err();
            assert!(matches!(err, Error::UnroutableTopic(ref t) if t == topic));
        }

        assert!(providers[0].performed().is_empty());
        assert!(client.published.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_ignores_unknown_payload() {
        let (mut registry, providers) = registry_of(1);
        let mut client = MockMqttClient::new();

        let routed = registry
            .dispatch("homeassistant/switch/puffer/switch_0/set", "online", &mut client)
            .await
            .unwrap();

        assert!(matches!(routed, Dispatched::Entity(_)));
        assert!(providers[0].performed().is_empty());
        assert!(client.published.is_empty());
    }
}
