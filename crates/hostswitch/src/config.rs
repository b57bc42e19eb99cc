//! Configuration loading.
//!
//! Settings come from an optional TOML file, then from the environment (a
//! `.env` file is loaded into the environment by `main`). Environment values
//! win over the file. Broker address and credentials are required; everything
//! else has a default.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::entity::SwitchState;
use crate::error::ConfigError;

pub const ENV_BROKER_ADDRESS: &str = "MQTT_BROKER_ADDRESS";
pub const ENV_USERNAME: &str = "MQTT_USERNAME";
pub const ENV_PASSWORD: &str = "MQTT_PASSWORD";
pub const ENV_HOST_ID: &str = "HOSTSWITCH_HOST_ID";
pub const ENV_DEVICE_NAME: &str = "HOSTSWITCH_DEVICE_NAME";
pub const ENV_LOG_LEVEL: &str = "HOSTSWITCH_LOG_LEVEL";

const DEFAULT_PORT: u16 = 1883;

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub device: DeviceConfig,
    pub logging: LoggingConfig,
    pub display: DisplayConfig,
    pub theme: ThemeConfig,
    pub commands: CommandsConfig,
    pub switches: Vec<SwitchConfig>,
}

#[derive(
    Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    #[strum(serialize = "warn", serialize = "warning")]
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `rumqttc = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Per-target filter: the default level plus any overrides
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

/// Broker connection and topic layout
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,

    /// Root of all discovery topics (default: "homeassistant")
    pub discovery_prefix: String,

    /// Topic the hub publishes its birth/will messages on
    pub status_topic: String,

    /// Payload on `status_topic` meaning the hub came online
    pub birth_payload: String,
}

/// Identity of this host as seen by the hub
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Namespaces topics and unique ids; `[a-z0-9_]` only
    pub host_id: String,

    /// Human readable device name
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,
    pub name: String,

    /// Display power cannot be read back, so the first announced state
    /// comes from here.
    pub initial_state: SwitchState,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "Display".to_string(),
            initial_state: SwitchState::On,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    pub enabled: bool,
    pub name: String,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "Dark Mode".to_string(),
        }
    }
}

fn default_payload_on() -> String {
    "ON".to_string()
}

fn default_payload_off() -> String {
    "OFF".to_string()
}

/// A command-backed switch declared in `[[switches]]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwitchConfig {
    /// Names the topics and unique id; `[a-z0-9_]` only
    pub object_id: String,
    pub name: String,

    /// Command run for the on payload
    pub on: Vec<String>,

    /// Command run for the off payload
    pub off: Vec<String>,

    #[serde(default = "default_payload_on")]
    pub payload_on: String,

    #[serde(default = "default_payload_off")]
    pub payload_off: String,

    #[serde(default)]
    pub initial_state: SwitchState,

    /// Report the requested state even when the command fails
    #[serde(default)]
    pub optimistic: bool,
}

/// Argument vectors run for each OS action. An empty list marks the action
/// as unsupported on this host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub display_on: Vec<String>,
    pub display_off: Vec<String>,
    pub theme_dark: Vec<String>,
    pub theme_light: Vec<String>,
    pub theme_query: Vec<String>,

    /// Substring of the `theme_query` output that means dark mode is active
    pub theme_query_dark_marker: String,
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// PowerShell snippets behind the Windows display defaults
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
mod windows {
    /// Tap Ctrl so the session leaves display power saving
    pub(super) const WAKE: &str = "$k = Add-Type -MemberDefinition '[DllImport(\"user32.dll\")] public static extern void keybd_event(byte v, byte s, uint f, UIntPtr e);' -Name K -Namespace HostSwitch -PassThru; $k::keybd_event(0x11, 0, 0, [UIntPtr]::Zero); $k::keybd_event(0x11, 0, 2, [UIntPtr]::Zero)";

    /// Broadcast SC_MONITORPOWER off. SMTO_ABORTIFHUNG with a 5 s timeout so
    /// a hung window cannot block the caller.
    pub(super) const SLEEP: &str = "$m = Add-Type -MemberDefinition '[DllImport(\"user32.dll\")] public static extern IntPtr SendMessageTimeout(IntPtr h, uint m, IntPtr w, IntPtr l, uint f, uint t, out UIntPtr r);' -Name M -Namespace HostSwitch -PassThru; $r = [UIntPtr]::Zero; [void]$m::SendMessageTimeout([IntPtr]0xFFFF, 0x0112, [IntPtr]0xF170, [IntPtr]2, 0x0002, 5000, [ref]$r)";
}

#[cfg(target_os = "windows")]
impl Default for CommandsConfig {
    fn default() -> Self {
        const PERSONALIZE: &str =
            r"HKCU\Software\Microsoft\Windows\CurrentVersion\Themes\Personalize";

        Self {
            display_on: argv(&["powershell", "-NoProfile", "-Command", windows::WAKE]),
            display_off: argv(&["powershell", "-NoProfile", "-Command", windows::SLEEP]),
            theme_dark: argv(&[
                "reg", "add", PERSONALIZE, "/v", "AppsUseLightTheme", "/t", "REG_DWORD", "/d",
                "0", "/f",
            ]),
            theme_light: argv(&[
                "reg", "add", PERSONALIZE, "/v", "AppsUseLightTheme", "/t", "REG_DWORD", "/d",
                "1", "/f",
            ]),
            theme_query: argv(&["reg", "query", PERSONALIZE, "/v", "AppsUseLightTheme"]),
            theme_query_dark_marker: "0x0".to_string(),
        }
    }
}

#[cfg(target_os = "macos")]
impl Default for CommandsConfig {
    fn default() -> Self {
        const APPEARANCE: &str = "tell application \"System Events\" to tell appearance preferences to";

        Self {
            display_on: argv(&["caffeinate", "-u", "-t", "1"]),
            display_off: argv(&["pmset", "displaysleepnow"]),
            theme_dark: argv(&["osascript", "-e", &format!("{APPEARANCE} set dark mode to true")]),
            theme_light: argv(&["osascript", "-e", &format!("{APPEARANCE} set dark mode to false")]),
            theme_query: argv(&["osascript", "-e", &format!("{APPEARANCE} get dark mode")]),
            theme_query_dark_marker: "true".to_string(),
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
impl Default for CommandsConfig {
    fn default() -> Self {
        const SCHEMA: &str = "org.gnome.desktop.interface";

        Self {
            display_on: argv(&["xset", "dpms", "force", "on"]),
            display_off: argv(&["xset", "dpms", "force", "off"]),
            theme_dark: argv(&["gsettings", "set", SCHEMA, "color-scheme", "prefer-dark"]),
            theme_light: argv(&["gsettings", "set", SCHEMA, "color-scheme", "default"]),
            theme_query: argv(&["gsettings", "get", SCHEMA, "color-scheme"]),
            theme_query_dark_marker: "prefer-dark".to_string(),
        }
    }
}

/// On-disk TOML shape. Every field is optional so the file may be partial or
/// absent entirely.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    mqtt: FileMqttConfig,
    device: FileDeviceConfig,
    logging: LoggingConfig,
    display: DisplayConfig,
    theme: ThemeConfig,
    commands: CommandsConfig,
    switches: Vec<SwitchConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileMqttConfig {
    broker: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    client_id: Option<String>,
    discovery_prefix: Option<String>,
    status_topic: Option<String>,
    birth_payload: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileDeviceConfig {
    host_id: Option<String>,
    name: Option<String>,
}

impl Config {
    /// Load from an optional TOML file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());

        let contents = match path {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|source| {
                ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                }
            })?),
            None => None,
        };

        let source_name = path.map(|p| p.display().to_string()).unwrap_or_default();
        Self::from_sources(
            contents.as_deref(),
            &source_name,
            |key| std::env::var(key).ok(),
            &hostname,
        )
    }

    /// Resolve configuration from already-read sources.
    ///
    /// `env` looks up an environment variable; `hostname` seeds the default
    /// host id and device name.
    pub fn from_sources(
        file: Option<&str>,
        source_name: &str,
        env: impl Fn(&str) -> Option<String>,
        hostname: &str,
    ) -> Result<Self, ConfigError> {
        let file: FileConfig = match file {
            Some(contents) => toml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: source_name.to_string(),
                source,
            })?,
            None => FileConfig::default(),
        };

        // Broker address, optionally with an explicit port
        let (broker, env_port) = match env(ENV_BROKER_ADDRESS).or(file.mqtt.broker) {
            Some(address) => split_host_port(&address)?,
            None => return Err(ConfigError::Missing(ENV_BROKER_ADDRESS)),
        };
        if broker.is_empty() {
            return Err(ConfigError::Missing(ENV_BROKER_ADDRESS));
        }
        let port = env_port.or(file.mqtt.port).unwrap_or(DEFAULT_PORT);

        let username = env(ENV_USERNAME)
            .or(file.mqtt.username)
            .ok_or(ConfigError::Missing(ENV_USERNAME))?;
        let password = env(ENV_PASSWORD)
            .or(file.mqtt.password)
            .ok_or(ConfigError::Missing(ENV_PASSWORD))?;

        let host_id = sanitize_host_id(
            &env(ENV_HOST_ID)
                .or(file.device.host_id)
                .unwrap_or_else(|| hostname.to_string()),
        );
        if host_id.is_empty() {
            return Err(ConfigError::Invalid {
                field: ENV_HOST_ID,
                message: "host id must contain at least one alphanumeric character".to_string(),
            });
        }

        let device_name = env(ENV_DEVICE_NAME)
            .or(file.device.name)
            .unwrap_or_else(|| hostname.to_string());

        let mut logging = file.logging;
        if let Some(level) = env(ENV_LOG_LEVEL) {
            logging.level = LogLevel::from_str(level.trim()).map_err(|_| ConfigError::Invalid {
                field: ENV_LOG_LEVEL,
                message: format!("unknown log level '{}'", level),
            })?;
        }

        let discovery_prefix = file
            .mqtt
            .discovery_prefix
            .unwrap_or_else(|| "homeassistant".to_string());
        let status_topic = file
            .mqtt
            .status_topic
            .unwrap_or_else(|| format!("{}/status", discovery_prefix));

        let mqtt = MqttConfig {
            broker,
            port,
            username,
            password,
            client_id: file
                .mqtt
                .client_id
                .unwrap_or_else(|| format!("hostswitch-{}", host_id)),
            discovery_prefix,
            status_topic,
            birth_payload: file
                .mqtt
                .birth_payload
                .unwrap_or_else(|| "online".to_string()),
        };

        if !file.commands.theme_query.is_empty()
            && file.commands.theme_query_dark_marker.is_empty()
        {
            return Err(ConfigError::Invalid {
                field: "commands.theme_query_dark_marker",
                message: "must not be empty while theme_query is set".to_string(),
            });
        }

        Ok(Config {
            mqtt,
            device: DeviceConfig {
                host_id,
                name: device_name,
            },
            logging,
            display: file.display,
            theme: file.theme,
            commands: file.commands,
            switches: file.switches,
        })
    }
}

/// Split `host[:port]`. IPv6 literals are accepted bare (`::1`, no port) or
/// bracketed (`[::1]` or `[::1]:1883`).
fn split_host_port(address: &str) -> Result<(String, Option<u16>), ConfigError> {
    let address = address.trim();

    if let Some(rest) = address.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(|| ConfigError::Invalid {
            field: ENV_BROKER_ADDRESS,
            message: format!("unterminated '[' in '{}'", address),
        })?;
        return match after {
            "" => Ok((host.to_string(), None)),
            _ => match after.strip_prefix(':') {
                Some(port) => Ok((host.to_string(), Some(parse_port(port)?))),
                None => Err(ConfigError::Invalid {
                    field: ENV_BROKER_ADDRESS,
                    message: format!("unexpected '{}' after ']'", after),
                }),
            },
        };
    }

    match address.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok((host.to_string(), Some(parse_port(port)?))),
        _ => Ok((address.to_string(), None)),
    }
}

fn parse_port(port: &str) -> Result<u16, ConfigError> {
    port.parse::<u16>().map_err(|_| ConfigError::Invalid {
        field: ENV_BROKER_ADDRESS,
        message: format!("invalid port '{}'", port),
    })
}

/// Lowercase and replace anything outside `[a-z0-9_]` with `_`, trimming
/// leading/trailing underscores.
pub fn sanitize_host_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() { c } else { '_' }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}
