//! Switch entities exposed to the hub.
//!
//! Every entity shares the same topic layout, discovery document and state
//! publishing. What differs is the [`Capability`]: the strategy that turns an
//! on/off command into an OS action and, where possible, reads the current
//! OS state back.

mod custom;
mod display;
mod state;
mod theme;

use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use tracing::debug;
use tracing::error;
use tracing::info;

pub use custom::Custom;
pub use display::Display;
pub use state::SwitchState;
pub use theme::ThemeMode;

use crate::actions::ActionProvider;
use crate::config::Config;
use crate::config::DeviceConfig;
use crate::error::ActionError;
use crate::error::Result;
use crate::mqtt::discovery;
use crate::mqtt::DeviceInfo;
use crate::mqtt::DiscoveryMessage;
use crate::mqtt::MqttClient;

/// Payload published on the state topic while the state is unknown
pub const UNKNOWN_PAYLOAD: &str = "None";

/// What happens to the entity state when its action fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Assume the requested state anyway
    Optimistic,
    /// Keep the previous state so it never drifts from the OS
    Strict,
}

/// Capability-specific behaviour behind an entity
#[async_trait]
pub trait Capability: Send + Sync {
    /// Short name for logs, e.g. "display"
    fn kind(&self) -> &'static str;

    /// Perform the OS action for an on (`true`) or off (`false`) command
    async fn apply(&self, on: bool) -> Result<(), ActionError>;

    /// Read the current OS state. `Ok(None)` means the state is not
    /// observable and the configured initial state should be used.
    async fn query_state(&self) -> Result<Option<SwitchState>, ActionError> {
        Ok(None)
    }

    fn failure_policy(&self) -> FailurePolicy;
}

/// Inputs available to entity factories
pub struct EntityContext<'a> {
    pub config: &'a Config,
    pub actions: Arc<dyn ActionProvider>,
}

/// Result type for entity factory functions
pub type EntityFactoryResult = Result<Vec<Entity>>;

/// Factories for every entity kind; each returns nothing when its kind is
/// disabled in configuration.
#[distributed_slice]
pub static ENTITY_FACTORIES: [fn(&EntityContext) -> EntityFactoryResult];

/// Run every registered factory and read back initial OS state
pub async fn build_entities(ctx: &EntityContext<'_>) -> Result<Vec<Entity>> {
    let mut entities = Vec::new();
    for factory in ENTITY_FACTORIES {
        entities.extend(factory(ctx)?);
    }
    for entity in &mut entities {
        entity.load_initial_state().await;
    }
    Ok(entities)
}

/// One controllable switch
pub struct Entity {
    topic_prefix: String,
    name: String,
    unique_id: String,
    payload_on: String,
    payload_off: String,
    state: SwitchState,
    device: DeviceInfo,
    capability: Box<dyn Capability>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("topic_prefix", &self.topic_prefix)
            .field("unique_id", &self.unique_id)
            .field("kind", &self.capability.kind())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Entity {
    /// Create a switch for this host with `ON`/`OFF` payloads and unknown
    /// state.
    ///
    /// `object_id` must be unique per host; it names the topics
    /// (`{discovery_prefix}/switch/{host_id}/{object_id}`) and the unique id
    /// (`{host_id}_{object_id}`).
    pub fn new(
        discovery_prefix: &str,
        device: &DeviceConfig,
        object_id: &str,
        name: &str,
        capability: Box<dyn Capability>,
    ) -> Self {
        Self {
            topic_prefix: discovery::switch_topic_prefix(
                discovery_prefix,
                &device.host_id,
                object_id,
            ),
            name: name.to_string(),
            unique_id: format!("{}_{}", device.host_id, object_id),
            payload_on: "ON".to_string(),
            payload_off: "OFF".to_string(),
            state: SwitchState::Unknown,
            device: DeviceInfo::for_host(&device.host_id, &device.name),
            capability,
        }
    }

    pub fn with_payloads(mut self, on: &str, off: &str) -> Self {
        self.payload_on = on.to_string();
        self.payload_off = off.to_string();
        self
    }

    pub fn with_state(mut self, state: SwitchState) -> Self {
        self.state = state;
        self
    }

    pub fn topic_prefix(&self) -> &str {
        &self.topic_prefix
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    pub fn command_topic(&self) -> String {
        discovery::command_topic(&self.topic_prefix)
    }

    pub fn state_topic(&self) -> String {
        discovery::state_topic(&self.topic_prefix)
    }

    pub fn config_topic(&self) -> String {
        discovery::config_topic(&self.topic_prefix)
    }

    /// Replace the configured state with the OS state where the capability
    /// can observe it. A failed read leaves the state unknown.
    pub async fn load_initial_state(&mut self) {
        match self.capability.query_state().await {
            Ok(Some(state)) => {
                debug!("{}: read initial state {}", self.unique_id, state);
                self.state = state;
            }
            Ok(None) => {}
            Err(e) => {
                error!("{}: failed to read initial state: {}", self.unique_id, e);
                self.state = SwitchState::Unknown;
            }
        }
    }

    /// Interpret a raw command payload.
    ///
    /// Payloads other than `payload_on`/`payload_off` are ignored. On success
    /// the new state is stored and published. A failed action is logged; the
    /// capability's [`FailurePolicy`] decides whether the state still changes.
    pub async fn handle_command(
        &mut self,
        payload: &str,
        client: &mut dyn MqttClient,
    ) -> Result<()> {
        let on = if payload == self.payload_on {
            true
        } else if payload == self.payload_off {
            false
        } else {
            debug!("{}: ignoring unrecognised payload {:?}", self.unique_id, payload);
            return Ok(());
        };

        debug!(
            "{}: running {} action ({})",
            self.unique_id,
            self.capability.kind(),
            if on { "on" } else { "off" }
        );

        if let Err(e) = self.capability.apply(on).await {
            error!("{}: {} action failed: {}", self.unique_id, self.capability.kind(), e);
            if self.capability.failure_policy() == FailurePolicy::Strict {
                return Ok(());
            }
        }

        self.state = SwitchState::from_on(on);
        self.announce_state(client).await
    }

    /// Discovery document advertising this entity
    pub fn discovery_message(&self) -> DiscoveryMessage {
        DiscoveryMessage {
            name: self.name.clone(),
            command_topic: self.command_topic(),
            state_topic: self.state_topic(),
            unique_id: self.unique_id.clone(),
            payload_on: self.payload_on.clone(),
            payload_off: self.payload_off.clone(),
            device: self.device.clone(),
        }
    }

    /// Publish the discovery document (not retained) followed by the state.
    ///
    /// Discovery is reissued whenever the hub comes online instead of being
    /// retained, so a retired entity never lingers on the broker.
    pub async fn announce_discovery(&self, client: &mut dyn MqttClient) -> Result<()> {
        let payload = serde_json::to_vec(&self.discovery_message())?;

        info!("Publishing discovery for {} ({})", self.name, self.unique_id);
        client.publish(&self.config_topic(), &payload, false).await?;

        self.announce_state(client).await
    }

    /// Publish the current state, retained so late subscribers see it
    pub async fn announce_state(&self, client: &mut dyn MqttClient) -> Result<()> {
        debug!("{}: publishing state {}", self.unique_id, self.state);
        client
            .publish(&self.state_topic(), self.state_payload().as_bytes(), true)
            .await?;
        Ok(())
    }

    fn state_payload(&self) -> &str {
        match self.state {
            SwitchState::On => &self.payload_on,
            SwitchState::Off => &self.payload_off,
            SwitchState::Unknown => UNKNOWN_PAYLOAD,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::actions::MockActionProvider;
    use crate::actions::Theme;
    use crate::error::Error;
    use crate::mqtt::client::MockCall;
    use crate::mqtt::client::MockMqttClient;

    pub(crate) fn device() -> DeviceConfig {
        DeviceConfig {
            host_id: "puffer".to_string(),
            name: "Puffer".to_string(),
        }
    }

    pub(crate) fn display_entity(actions: Arc<MockActionProvider>) -> Entity {
        Entity::new(
            "homeassistant",
            &device(),
            "display",
            "Display",
            Box::new(Display::new(actions)),
        )
        .with_state(SwitchState::On)
    }

    fn theme_entity(actions: Arc<MockActionProvider>) -> Entity {
        Entity::new(
            "homeassistant",
            &device(),
            "dark_mode",
            "Dark Mode",
            Box::new(ThemeMode::new(actions)),
        )
    }

    #[test]
    fn test_identity_and_topics() {
        let entity = display_entity(Arc::new(MockActionProvider::new()));
        assert_eq!(entity.topic_prefix(), "homeassistant/switch/puffer/display");
        assert_eq!(entity.unique_id(), "puffer_display");
        assert_eq!(entity.command_topic(), "homeassistant/switch/puffer/display/set");
        assert_eq!(entity.state_topic(), "homeassistant/switch/puffer/display/state");
        assert_eq!(entity.config_topic(), "homeassistant/switch/puffer/display/config");
    }

    #[test]
    fn test_discovery_document() {
        let entity = display_entity(Arc::new(MockActionProvider::new()));
        let json = serde_json::to_string_pretty(&entity.discovery_message()).unwrap();
        insta::assert_snapshot!(json, @r#"
        {
          "name": "Display",
          "command_topic": "homeassistant/switch/puffer/display/set",
          "state_topic": "homeassistant/switch/puffer/display/state",
          "unique_id": "puffer_display",
          "payload_on": "ON",
          "payload_off": "OFF",
          "device": {
            "identifiers": [
              "puffer"
            ],
            "name": "Puffer"
          }
        }
        "#);
    }

    #[tokio::test]
    async fn test_discovery_topics_match_wire_topics() {
        let actions = Arc::new(MockActionProvider::new());
        let mut entity = display_entity(actions).with_payloads("1", "0");
        let mut client = MockMqttClient::new();

        entity.announce_discovery(&mut client).await.unwrap();
        let (_, payload, _) = &client.published[0];
        let doc: DiscoveryMessage = serde_json::from_slice(payload).unwrap();
        assert_eq!(doc.command_topic, format!("{}/set", entity.topic_prefix()));
        assert_eq!(doc.state_topic, format!("{}/state", entity.topic_prefix()));
        assert_eq!(doc.payload_on, "1");
        assert_eq!(doc.payload_off, "0");

        client.clear();
        entity.handle_command("0", &mut client).await.unwrap();
        assert_eq!(client.published[0].0, doc.state_topic);
    }

    #[tokio::test]
    async fn test_announce_discovery_then_state() {
        let entity = display_entity(Arc::new(MockActionProvider::new()));
        let mut client = MockMqttClient::new();

        entity.announce_discovery(&mut client).await.unwrap();

        assert_eq!(client.calls.len(), 2);
        match &client.calls[0] {
            MockCall::Publish { topic, retain, .. } => {
                assert_eq!(topic, "homeassistant/switch/puffer/display/config");
                assert!(!retain);
            }
            other => panic!("unexpected call: {other:?}"),
        }
        assert_eq!(
            client.calls[1],
            MockCall::Publish {
                topic: "homeassistant/switch/puffer/display/state".to_string(),
                payload: "ON".to_string(),
                retain: true,
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_state_payload() {
        let entity = theme_entity(Arc::new(MockActionProvider::new()));
        let mut client = MockMqttClient::new();
        entity.announce_state(&mut client).await.unwrap();
        assert_eq!(
            client.published_to("homeassistant/switch/puffer/dark_mode/state"),
            vec![("None".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_on_command_sets_state_and_publishes_once() {
        let actions = Arc::new(MockActionProvider::new());
        let mut entity = display_entity(actions.clone()).with_state(SwitchState::Off);
        let mut client = MockMqttClient::new();

        entity.handle_command("ON", &mut client).await.unwrap();

        assert_eq!(entity.state(), SwitchState::On);
        assert_eq!(actions.performed(), vec![Action::WakeDisplay]);
        assert_eq!(client.published.len(), 1);
        assert_eq!(
            client.published_to(&entity.state_topic()),
            vec![("ON".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_unrecognised_payload_is_ignored() {
        let actions = Arc::new(MockActionProvider::new());
        let mut entity = display_entity(actions.clone());
        let mut client = MockMqttClient::new();

        for payload in ["on", "TOGGLE", "", "online"] {
            entity.handle_command(payload, &mut client).await.unwrap();
        }

        assert_eq!(entity.state(), SwitchState::On);
        assert!(actions.performed().is_empty());
        assert!(client.published.is_empty());
    }

    #[tokio::test]
    async fn test_custom_payloads() {
        let actions = Arc::new(MockActionProvider::new());
        let mut entity = display_entity(actions.clone()).with_payloads("wake", "sleep");
        let mut client = MockMqttClient::new();

        entity.handle_command("ON", &mut client).await.unwrap();
        assert!(client.published.is_empty());

        entity.handle_command("sleep", &mut client).await.unwrap();
        assert_eq!(entity.state(), SwitchState::Off);
        assert_eq!(
            client.published_to(&entity.state_topic()),
            vec![("sleep".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_display_failure_is_optimistic() {
        let actions = Arc::new(MockActionProvider::failing());
        let mut entity = display_entity(actions.clone());
        let mut client = MockMqttClient::new();

        entity.handle_command("OFF", &mut client).await.unwrap();

        assert_eq!(actions.performed(), vec![Action::SleepDisplay]);
        assert_eq!(entity.state(), SwitchState::Off);
        assert_eq!(client.published.len(), 1);
    }

    #[tokio::test]
    async fn test_theme_failure_keeps_state() {
        let actions = Arc::new(MockActionProvider::failing());
        let mut entity = theme_entity(actions.clone()).with_state(SwitchState::Off);
        let mut client = MockMqttClient::new();

        entity.handle_command("ON", &mut client).await.unwrap();

        assert_eq!(actions.performed(), vec![Action::SetTheme(Theme::Dark)]);
        assert_eq!(entity.state(), SwitchState::Off);
        assert!(client.published.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let mut entity = display_entity(Arc::new(MockActionProvider::new()));
        let mut client = MockMqttClient {
            fail_publish: true,
            ..MockMqttClient::new()
        };

        let err = entity.handle_command("OFF", &mut client).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(entity.state(), SwitchState::Off);
    }

    #[tokio::test]
    async fn test_load_initial_state_from_theme() {
        let actions = Arc::new(MockActionProvider::with_theme(Theme::Light));
        let mut entity = theme_entity(actions).with_state(SwitchState::On);
        entity.load_initial_state().await;
        assert_eq!(entity.state(), SwitchState::Off);
    }

    #[tokio::test]
    async fn test_load_initial_state_failure_is_unknown() {
        let mut entity =
            theme_entity(Arc::new(MockActionProvider::new())).with_state(SwitchState::On);
        entity.load_initial_state().await;
        assert_eq!(entity.state(), SwitchState::Unknown);
    }

    #[tokio::test]
    async fn test_display_keeps_configured_initial_state() {
        let mut entity =
            display_entity(Arc::new(MockActionProvider::new())).with_state(SwitchState::Off);
        entity.load_initial_state().await;
        assert_eq!(entity.state(), SwitchState::Off);
    }
}
