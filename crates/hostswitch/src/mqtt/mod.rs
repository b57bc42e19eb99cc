pub mod client;
pub mod discovery;

pub use client::MqttClient;
pub use client::MqttEvent;
pub use client::MqttMessage;
pub use client::RumqttcClient;
pub use discovery::DeviceInfo;
pub use discovery::DiscoveryMessage;
