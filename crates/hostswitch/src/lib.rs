//! hostswitch exposes machine-level controls (display power, dark mode and
//! configured command switches) to a home-automation hub as MQTT switch
//! entities, using the hub's discovery convention.

pub mod actions;
pub mod bridge;
pub mod config;
pub mod entity;
pub mod error;
pub mod mqtt;
pub mod registry;

pub use bridge::Bridge;
pub use config::Config;
pub use config::LogLevel;
pub use entity::Entity;
pub use entity::SwitchState;
pub use error::Error;
pub use registry::Registry;
