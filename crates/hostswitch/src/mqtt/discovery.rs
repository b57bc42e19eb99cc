use serde::Deserialize;
use serde::Serialize;

/// Suffix of the topic an entity publishes its discovery document to
pub const CONFIG_SUFFIX: &str = "/config";

/// Suffix of the topic an entity receives commands on
pub const COMMAND_SUFFIX: &str = "/set";

/// Suffix of the topic an entity publishes its state to
pub const STATE_SUFFIX: &str = "/state";

/// Discovery document for a switch entity
///
/// Published (not retained) to `{prefix}/config`. Follows Home Assistant's
/// MQTT discovery schema for the `switch` component.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DiscoveryMessage {
    /// Human-readable name of the entity
    pub name: String,

    /// Topic the hub sends commands to
    pub command_topic: String,

    /// Topic the hub reads state from
    pub state_topic: String,

    /// Identifier unique across every entity this host announces
    pub unique_id: String,

    /// Payload meaning "on"
    pub payload_on: String,

    /// Payload meaning "off"
    pub payload_off: String,

    /// Device information
    pub device: DeviceInfo,
}

/// Device grouping metadata
///
/// The hub groups every entity carrying the same `identifiers` under one
/// device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceInfo {
    /// List of identifiers for this device
    pub identifiers: Vec<String>,

    /// Device name
    pub name: String,
}

impl DeviceInfo {
    /// Device descriptor for this host
    pub fn for_host(host_id: &str, name: &str) -> Self {
        Self {
            identifiers: vec![host_id.to_string()],
            name: name.to_string(),
        }
    }
}

/// Build the topic prefix for a switch on this host
///
/// Format: {discovery_prefix}/switch/{host_id}/{object_id}
/// Example: homeassistant/switch/puffer/display
pub fn switch_topic_prefix(discovery_prefix: &str, host_id: &str, object_id: &str) -> String {
    format!("{}/switch/{}/{}", discovery_prefix, host_id, object_id)
}

pub fn config_topic(prefix: &str) -> String {
    format!("{}{}", prefix, CONFIG_SUFFIX)
}

pub fn command_topic(prefix: &str) -> String {
    format!("{}{}", prefix, COMMAND_SUFFIX)
}

pub fn state_topic(prefix: &str) -> String {
    format!("{}{}", prefix, STATE_SUFFIX)
}

/// Strip exactly one trailing `/set`, returning the entity prefix
pub fn strip_command_suffix(topic: &str) -> Option<&str> {
    topic
        .strip_suffix(COMMAND_SUFFIX)
        .filter(|prefix| !prefix.is_empty())
}
